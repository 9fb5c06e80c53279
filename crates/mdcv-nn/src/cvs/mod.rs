// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Collective-variable pipelines assembled from fixed, enumerated blocks.
//!
//! Capabilities are split into independent traits: [`CollectiveVariable`]
//! is the inference surface, [`Trainable`] the optimization surface and
//! [`Lifecycle`] the epoch hooks the trainer invokes explicitly. A pipeline
//! implements whichever subset applies.

mod deep_tica;
mod options;
mod regression;

use crate::{PureResult, Tensor};
use mdcv_metrics::MetricSink;

pub use deep_tica::DeepTicaCv;
pub use options::{BlockOption, DeepTicaOptions, LossOptions, RegressionOptions};
pub use regression::RegressionCv;

/// Inference surface of a collective variable: a deterministic map from
/// descriptor space to CV space.
pub trait CollectiveVariable {
    /// Width of the descriptor input.
    fn in_features(&self) -> usize;

    /// Number of collective variables produced.
    fn out_features(&self) -> usize;

    /// Evaluates the pipeline on a batch of descriptors.
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;
}

/// Optimization surface consumed by the trainer.
pub trait Trainable {
    /// Mini-batch type the pipeline trains on.
    type Batch;

    /// Runs one optimization step on a batch: forward, loss, gradient
    /// accumulation and diagnostics. Returns the scalar loss.
    fn training_step(
        &mut self,
        batch: &Self::Batch,
        step: u64,
        sink: &dyn MetricSink,
    ) -> PureResult<f32>;

    /// Clears every pending gradient accumulator.
    fn zero_accumulators(&mut self) -> PureResult<()>;

    /// Applies the accumulated gradients with the given learning rate.
    fn apply_step(&mut self, learning_rate: f32) -> PureResult<()>;

    /// Human-readable description of the objective being minimized.
    fn loss_description(&self) -> &'static str;
}

/// Epoch hooks cascaded by the trainer. Defaults are no-ops.
pub trait Lifecycle {
    /// Invoked before the first batch of an epoch.
    fn on_train_epoch_start(&mut self) -> PureResult<()> {
        Ok(())
    }

    /// Invoked after the last batch of an epoch.
    fn on_train_epoch_end(&mut self) -> PureResult<()> {
        Ok(())
    }
}
