// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Minimal epoch-driven training orchestrator.

use crate::cvs::{Lifecycle, Trainable};
use crate::{PureResult, TensorError};
use mdcv_metrics::{MetricSink, NullSink};
use std::sync::Arc;
use tracing::info;

/// Aggregate statistics of one training epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    /// Number of batches consumed.
    pub batches: usize,
    /// Sum of per-batch losses.
    pub total_loss: f64,
    /// Average per-batch loss.
    pub mean_loss: f64,
}

/// Drives zero-grad, training step and parameter update per batch, with the
/// lifecycle hooks of the pipeline invoked around every epoch. A global step
/// counter is threaded to the metric sink.
pub struct ModuleTrainer {
    learning_rate: f32,
    sink: Arc<dyn MetricSink>,
    step: u64,
}

impl ModuleTrainer {
    /// Creates a trainer with the given Euclidean learning rate and no
    /// diagnostics.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            sink: Arc::new(NullSink),
            step: 0,
        }
    }

    /// Attaches a metric sink receiving per-step diagnostics.
    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the configured learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Number of optimization steps taken so far.
    pub fn global_step(&self) -> u64 {
        self.step
    }

    /// Runs one epoch over the provided batches.
    pub fn train_epoch<C, I>(&mut self, cv: &mut C, batches: I) -> PureResult<EpochStats>
    where
        C: Trainable + Lifecycle,
        I: IntoIterator<Item = PureResult<C::Batch>>,
    {
        cv.on_train_epoch_start()?;
        let mut count = 0usize;
        let mut total = 0.0f64;
        for batch in batches {
            let batch = batch?;
            cv.zero_accumulators()?;
            let loss = cv.training_step(&batch, self.step, self.sink.as_ref())?;
            cv.apply_step(self.learning_rate)?;
            self.step += 1;
            count += 1;
            total += loss as f64;
        }
        cv.on_train_epoch_end()?;
        if count == 0 {
            return Err(TensorError::EmptyInput("training_batches"));
        }
        Ok(EpochStats {
            batches: count,
            total_loss: total,
            mean_loss: total / count as f64,
        })
    }

    /// Runs `epochs` epochs, drawing a fresh batch iterator per epoch.
    pub fn fit<C, I, F>(
        &mut self,
        cv: &mut C,
        epochs: usize,
        mut batches: F,
    ) -> PureResult<Vec<EpochStats>>
    where
        C: Trainable + Lifecycle,
        I: IntoIterator<Item = PureResult<C::Batch>>,
        F: FnMut(usize) -> I,
    {
        let mut history = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let stats = self.train_epoch(cv, batches(epoch))?;
            info!(
                target: "mdcv::trainer",
                epoch,
                batches = stats.batches,
                mean_loss = stats.mean_loss,
                objective = cv.loss_description(),
                "epoch finished"
            );
            history.push(stats);
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvs::{DeepTicaCv, DeepTicaOptions, RegressionCv, RegressionOptions};
    use crate::dataset::{InMemoryDataset, TimeLaggedDataset};
    use crate::Tensor;
    use mdcv_metrics::MemorySink;

    #[test]
    fn epoch_over_time_lagged_batches_advances_the_step_counter() {
        let trajectory = Tensor::random_normal(60, 2, 0.0, 1.0, Some(13)).unwrap();
        let dataset = TimeLaggedDataset::from_trajectory(&trajectory, 1, None).unwrap();
        let mut cv = DeepTicaCv::new(&[2, 6, 2], DeepTicaOptions::default()).unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut trainer = ModuleTrainer::new(0.01).with_sink(sink.clone());

        let loader = dataset.loader().shuffle(1).batched(20);
        let stats = trainer.train_epoch(&mut cv, loader.iter()).unwrap();
        assert_eq!(stats.batches, 3);
        assert!(stats.mean_loss.is_finite());
        assert_eq!(trainer.global_step(), 3);
        assert_eq!(sink.values_for("train_loss").len(), 3);
    }

    #[test]
    fn empty_loader_is_an_error() {
        let mut cv = DeepTicaCv::new(&[2, 4, 2], DeepTicaOptions::default()).unwrap();
        let mut trainer = ModuleTrainer::new(0.01);
        let result = trainer.train_epoch(&mut cv, Vec::new());
        assert!(matches!(result, Err(TensorError::EmptyInput(_))));
    }

    #[test]
    fn fit_reduces_regression_loss_across_epochs() {
        let input = Tensor::from_fn(12, 1, |r, _| r as f32 / 6.0 - 1.0).unwrap();
        let target = input.scale(-0.3).unwrap();
        let mut dataset = InMemoryDataset::new();
        for idx in 0..12 {
            dataset.push(
                Tensor::from_vec(1, 1, vec![input.data()[idx]]).unwrap(),
                Tensor::from_vec(1, 1, vec![target.data()[idx]]).unwrap(),
            );
        }
        let mut cv = RegressionCv::new(&[1, 6, 1], RegressionOptions::default()).unwrap();
        let mut trainer = ModuleTrainer::new(0.05);
        let history = trainer
            .fit(&mut cv, 30, |epoch| {
                dataset.loader().shuffle(epoch as u64).batched(4).iter()
            })
            .unwrap();
        assert_eq!(history.len(), 30);
        assert!(history.last().unwrap().mean_loss < history[0].mean_loss);
    }
}
