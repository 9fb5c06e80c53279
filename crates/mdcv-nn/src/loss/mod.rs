// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

mod eigvals;
mod mean_squared_error;

use crate::{PureResult, Tensor};

pub use eigvals::{reduce_eigenvalues, reduce_eigenvalues_grad, ReductionMode};
pub use mean_squared_error::MeanSquaredError;

/// Trait implemented by differentiable losses that operate directly on
/// prediction tensors.
pub trait Loss {
    /// Computes the scalar loss value for the given predictions and targets.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<f32>;

    /// Returns the gradient of the loss with respect to the predictions.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;
}
