// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use serde::Deserialize;

/// Stateless nonlinearities available to the feed-forward featurizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Rectified linear unit.
    Relu,
    /// Hyperbolic tangent, the usual choice for TICA featurizers.
    #[default]
    Tanh,
}

/// Lightweight ReLU activation. Stateless, so it does not participate in
/// parameter visits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Relu;

impl Relu {
    /// Creates a new ReLU layer.
    pub fn new() -> Self {
        Self
    }
}

impl Module for Relu {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let (rows, cols) = input.shape();
        let data = input.data().iter().map(|v| v.max(0.0)).collect();
        Tensor::from_vec(rows, cols, data)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let (rows, cols) = input.shape();
        let data = input
            .data()
            .iter()
            .zip(grad_output.data().iter())
            .map(|(x, g)| if *x > 0.0 { *g } else { 0.0 })
            .collect();
        Tensor::from_vec(rows, cols, data)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

/// Hyperbolic tangent activation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tanh;

impl Tanh {
    /// Creates a new tanh layer.
    pub fn new() -> Self {
        Self
    }
}

impl Module for Tanh {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let (rows, cols) = input.shape();
        let data = input.data().iter().map(|v| v.tanh()).collect();
        Tensor::from_vec(rows, cols, data)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let (rows, cols) = input.shape();
        let data = input
            .data()
            .iter()
            .zip(grad_output.data().iter())
            .map(|(x, g)| {
                let t = x.tanh();
                g * (1.0 - t * t)
            })
            .collect();
        Tensor::from_vec(rows, cols, data)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_forward_backward() {
        let relu = Relu::new();
        let input = Tensor::from_vec(1, 4, vec![-1.0, -0.5, 0.2, 1.5]).unwrap();
        let output = relu.forward(&input).unwrap();
        assert_eq!(output.data(), &[0.0, 0.0, 0.2, 1.5]);

        let mut relu = relu;
        let grad_output = Tensor::from_vec(1, 4, vec![0.3, 0.4, 0.5, 0.6]).unwrap();
        let grad_input = relu.backward(&input, &grad_output).unwrap();
        assert_eq!(grad_input.data(), &[0.0, 0.0, 0.5, 0.6]);
    }

    #[test]
    fn tanh_gradient_matches_derivative() {
        let mut layer = Tanh::new();
        let input = Tensor::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        let grad_output = Tensor::from_vec(1, 2, vec![1.0, 1.0]).unwrap();
        let grad = layer.backward(&input, &grad_output).unwrap();
        assert!((grad.data()[0] - 1.0).abs() < 1e-6);
        let t: f32 = 1.0f32.tanh();
        assert!((grad.data()[1] - (1.0 - t * t)).abs() < 1e-6);
    }
}
