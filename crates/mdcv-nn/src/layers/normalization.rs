// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use serde::Deserialize;
use std::cell::{Cell, RefCell};

/// Options accepted by the [`Normalization`] block.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct NormalizationOptions {
    /// Blend factor applied to fresh batch statistics.
    pub momentum: f32,
    /// Variance floor guarding the inverse standard deviation.
    pub epsilon: f32,
}

impl Default for NormalizationOptions {
    fn default() -> Self {
        Self {
            momentum: 0.1,
            epsilon: 1e-6,
        }
    }
}

/// Per-feature affine standardization `(x - mean) / std`.
///
/// The block carries no trainable parameters. During training each forward
/// pass standardizes with the statistics of the current batch and folds them
/// into running buffers; evaluation mode applies the frozen running
/// statistics, which keeps inference pure and reproducible.
#[derive(Debug)]
pub struct Normalization {
    features: usize,
    momentum: f32,
    epsilon: f32,
    running_mean: RefCell<Tensor>,
    running_var: RefCell<Tensor>,
    training: Cell<bool>,
    last_inv_std: RefCell<Option<Vec<f32>>>,
}

impl Normalization {
    /// Creates a standardization block for `features`-wide inputs.
    pub fn new(features: usize, options: NormalizationOptions) -> PureResult<Self> {
        if features == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: 1,
                cols: features,
            });
        }
        if !(0.0..=1.0).contains(&options.momentum) || !options.momentum.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "normalization_momentum",
            });
        }
        if options.epsilon <= 0.0 || !options.epsilon.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "normalization_epsilon",
                value: options.epsilon,
            });
        }
        Ok(Self {
            features,
            momentum: options.momentum,
            epsilon: options.epsilon,
            running_mean: RefCell::new(Tensor::zeros(1, features)?),
            running_var: RefCell::new(Tensor::from_vec(1, features, vec![1.0; features])?),
            training: Cell::new(true),
            last_inv_std: RefCell::new(None),
        })
    }

    /// Returns the number of features standardized per row.
    pub fn features(&self) -> usize {
        self.features
    }

    /// Enables or disables statistic accumulation.
    pub fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    /// Switches the block to training mode.
    pub fn train(&self) {
        self.set_training(true);
    }

    /// Switches the block to evaluation mode.
    pub fn eval(&self) {
        self.set_training(false);
    }

    /// Snapshot of the running mean.
    pub fn running_mean(&self) -> Tensor {
        self.running_mean.borrow().clone()
    }

    /// Snapshot of the running variance.
    pub fn running_var(&self) -> Tensor {
        self.running_var.borrow().clone()
    }

    /// Maps standardized values back to the original feature scale using the
    /// running statistics.
    pub fn inverse(&self, output: &Tensor) -> PureResult<Tensor> {
        self.guard_input(output)?;
        let (rows, cols) = output.shape();
        let mean = self.running_mean.borrow();
        let var = self.running_var.borrow();
        let mut data = Vec::with_capacity(rows * cols);
        for row in output.data().chunks(cols) {
            for (feature, value) in row.iter().enumerate() {
                let std = (var.data()[feature] + self.epsilon).sqrt();
                data.push(value * std + mean.data()[feature]);
            }
        }
        Tensor::from_vec(rows, cols, data)
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<()> {
        let (rows, cols) = input.shape();
        if cols != self.features {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.features),
            });
        }
        if rows == 0 {
            return Err(TensorError::EmptyInput("normalization_input"));
        }
        Ok(())
    }

    fn compute_stats(&self, input: &Tensor) -> (Vec<f32>, Vec<f32>) {
        let (batch, features) = input.shape();
        let scale = 1.0 / batch as f32;
        let mut mean = vec![0.0f32; features];
        for row in input.data().chunks(features) {
            for (idx, value) in row.iter().enumerate() {
                mean[idx] += value;
            }
        }
        for value in mean.iter_mut() {
            *value *= scale;
        }
        let mut variance = vec![0.0f32; features];
        for row in input.data().chunks(features) {
            for (idx, value) in row.iter().enumerate() {
                let centered = value - mean[idx];
                variance[idx] += centered * centered;
            }
        }
        for value in variance.iter_mut() {
            *value *= scale;
        }
        (mean, variance)
    }
}

impl Module for Normalization {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        let (batch, features) = input.shape();
        let (mean, variance) = if self.training.get() {
            let (mean, variance) = self.compute_stats(input);
            {
                let mut running_mean = self.running_mean.borrow_mut();
                let data = running_mean.data_mut();
                for idx in 0..features {
                    data[idx] = self.momentum * mean[idx] + (1.0 - self.momentum) * data[idx];
                }
            }
            {
                let mut running_var = self.running_var.borrow_mut();
                let data = running_var.data_mut();
                for idx in 0..features {
                    data[idx] = self.momentum * variance[idx] + (1.0 - self.momentum) * data[idx];
                }
            }
            (mean, variance)
        } else {
            let running_mean = self.running_mean.borrow();
            let running_var = self.running_var.borrow();
            (running_mean.data().to_vec(), running_var.data().to_vec())
        };

        let inv_std: Vec<f32> = variance
            .iter()
            .map(|v| 1.0 / (v + self.epsilon).sqrt())
            .collect();
        *self.last_inv_std.borrow_mut() = Some(inv_std.clone());

        let mut output = Vec::with_capacity(batch * features);
        for row in input.data().chunks(features) {
            for (feature, value) in row.iter().enumerate() {
                output.push((value - mean[feature]) * inv_std[feature]);
            }
        }
        Tensor::from_vec(batch, features, output)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        if input.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        // The statistics are treated as constants of the step, so the
        // Jacobian is the diagonal 1/std map cached by the last forward.
        let inv_std = self
            .last_inv_std
            .borrow()
            .clone()
            .ok_or(TensorError::InvalidValue {
                label: "normalization_backward_before_forward",
            })?;
        let (batch, features) = input.shape();
        let mut data = Vec::with_capacity(batch * features);
        for row in grad_output.data().chunks(features) {
            for (feature, grad) in row.iter().enumerate() {
                data.push(grad * inv_std[feature]);
            }
        }
        Tensor::from_vec(batch, features, data)
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
