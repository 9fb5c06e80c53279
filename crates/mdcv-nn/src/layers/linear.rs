// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Fully-connected layer.
#[derive(Debug)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Creates a new linear layer with a seeded uniform initialisation in
    /// `[-1/sqrt(in), 1/sqrt(in))`. The seed is derived from the layer name so
    /// two models built from the same configuration start identical.
    pub fn new(name: impl Into<String>, input_dim: usize, output_dim: usize) -> PureResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: output_dim,
            });
        }
        let name = name.into();
        let bound = 1.0 / (input_dim as f32).sqrt();
        let seed = mdcv_config::config().seed_for(name.as_str());
        let weights = Tensor::random_uniform(input_dim, output_dim, -bound, bound, Some(seed))?;
        let bias = Tensor::zeros(1, output_dim)?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weights),
            bias: Parameter::new(format!("{name}::bias"), bias),
        })
    }

    /// Returns a reference to the weight parameter.
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Returns a reference to the bias parameter.
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != self.weight.value().shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: self.weight.value().shape(),
            });
        }
        let mut out = input.matmul(self.weight.value())?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape().0 != grad_output.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let batch = input.shape().0 as f32;
        let grad_w = input.transpose().matmul(grad_output)?.scale(1.0 / batch)?;
        self.weight.accumulate_euclidean(&grad_w)?;

        let summed = grad_output.sum_axis0();
        let grad_b = Tensor::from_vec(1, summed.len(), summed)?.scale(1.0 / batch)?;
        self.bias.accumulate_euclidean(&grad_b)?;

        let weight_t = self.weight.value().transpose();
        grad_output.matmul(&weight_t)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_applies_affine_map() {
        let mut layer = Linear::new("fc", 2, 1).unwrap();
        layer
            .weight
            .load_value(&Tensor::from_vec(2, 1, vec![1.0, -1.0]).unwrap())
            .unwrap();
        layer
            .bias
            .load_value(&Tensor::from_vec(1, 1, vec![0.5]).unwrap())
            .unwrap();
        let input = Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.data(), &[-0.5, -0.5]);
    }

    #[test]
    fn backward_accumulates_batch_averaged_gradients() {
        let mut layer = Linear::new("fc", 2, 1).unwrap();
        let input = Tensor::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let grad = Tensor::from_vec(2, 1, vec![2.0, 4.0]).unwrap();
        let grad_input = layer.backward(&input, &grad).unwrap();
        assert_eq!(grad_input.shape(), (2, 2));
        let grad_w = layer.weight().gradient().unwrap();
        assert_eq!(grad_w.data(), &[1.0, 2.0]);
        let grad_b = layer.bias().gradient().unwrap();
        assert_eq!(grad_b.data(), &[3.0]);
    }

    #[test]
    fn same_name_reinitialises_identically() {
        let a = Linear::new("repeat", 4, 3).unwrap();
        let b = Linear::new("repeat", 4, 3).unwrap();
        assert_eq!(a.weight().value(), b.weight().value());
    }
}
