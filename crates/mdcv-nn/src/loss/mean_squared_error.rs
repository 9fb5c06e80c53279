// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

use super::Loss;
use crate::{PureResult, Tensor};

/// Mean squared error with mean reduction over every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    /// Creates a new mean squared error loss instance.
    pub fn new() -> Self {
        Self
    }
}

impl Loss for MeanSquaredError {
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<f32> {
        let residual = prediction.sub(target)?;
        Ok(residual.squared_l2_norm() / residual.len() as f32)
    }

    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        let residual = prediction.sub(target)?;
        let len = residual.len() as f32;
        residual.scale(2.0 / len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TensorError;

    #[test]
    fn value_is_the_mean_squared_residual() {
        let mut loss = MeanSquaredError::new();
        let prediction = Tensor::from_vec(2, 2, vec![1.0, 0.0, -1.0, 2.0]).unwrap();
        let target = Tensor::from_vec(2, 2, vec![0.0, 0.0, -1.0, 0.0]).unwrap();
        // Residuals 1, 0, 0, 2 give (1 + 4) / 4.
        let value = loss.forward(&prediction, &target).unwrap();
        assert!((value - 1.25).abs() < 1e-6);
    }

    #[test]
    fn gradient_points_from_target_to_prediction() {
        let mut loss = MeanSquaredError::new();
        let prediction = Tensor::from_vec(1, 3, vec![0.5, -0.5, 1.0]).unwrap();
        let target = Tensor::from_vec(1, 3, vec![0.0, 0.0, 1.0]).unwrap();
        let grad = loss.backward(&prediction, &target).unwrap();
        assert_eq!(grad.shape(), (1, 3));
        assert!((grad.data()[0] - 2.0 * 0.5 / 3.0).abs() < 1e-6);
        assert!(grad.data()[1] < 0.0);
        assert_eq!(grad.data()[2], 0.0);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut loss = MeanSquaredError::new();
        let prediction = Tensor::zeros(2, 1).unwrap();
        let target = Tensor::zeros(1, 2).unwrap();
        assert!(matches!(
            loss.forward(&prediction, &target),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
