// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Neural collective variables trained on the slow spectrum of the
//! time-lagged covariance problem.

use crate::cvs::options::{DeepTicaOptions, LossOptions};
use crate::cvs::{CollectiveVariable, Lifecycle, Trainable};
use crate::dataset::TimeLagBatch;
use crate::layers::{FeedForward, Normalization};
use crate::loss::{reduce_eigenvalues, reduce_eigenvalues_grad, ReductionMode};
use crate::module::Module;
use crate::stats::TicaEngine;
use crate::{PureResult, Tensor, TensorError};
use mdcv_metrics::MetricSink;
use std::cell::Cell;
use tracing::debug;

/// Deep-TICA pipeline with fixed slots applied in order:
/// input standardization, feed-forward featurizer, TICA projection, output
/// standardization. An empty slot is an identity map.
///
/// Training maximizes a reduction of the leading TICA eigenvalues of the
/// featurized batch; the projection onto the corresponding eigenvectors is
/// cached on every training step so inference always uses the latest
/// estimate of the slow modes.
#[derive(Debug)]
pub struct DeepTicaCv {
    norm_in: Option<Normalization>,
    nn: Option<FeedForward>,
    tica: Option<TicaEngine>,
    norm_out: Option<Normalization>,
    loss: LossOptions,
    in_features: usize,
    out_features: usize,
    training: Cell<bool>,
}

impl DeepTicaCv {
    /// Builds a pipeline whose featurizer has the given layer widths, e.g.
    /// `[45, 30, 30, 5]` for 45 descriptors and 5 latent features.
    pub fn new(layers: &[usize], options: DeepTicaOptions) -> PureResult<Self> {
        let nn = FeedForward::new("deep_tica::nn", layers, options.activation)?;
        let in_features = nn.in_features();
        let latent = nn.out_features();

        let tica = match options.tica.resolve() {
            Some(tica_options) => Some(TicaEngine::new(
                latent,
                options.out_features.unwrap_or(latent),
                tica_options,
            )?),
            None => None,
        };
        let out_features = tica.as_ref().map_or(latent, TicaEngine::out_features);

        let norm_in = match options.norm_in.resolve() {
            Some(norm_options) => Some(Normalization::new(in_features, norm_options)?),
            None => None,
        };
        let norm_out = match options.norm_out.resolve() {
            Some(norm_options) => Some(Normalization::new(out_features, norm_options)?),
            None => None,
        };

        Ok(Self {
            norm_in,
            nn: Some(nn),
            tica,
            norm_out,
            loss: options.loss,
            in_features,
            out_features,
            training: Cell::new(true),
        })
    }

    /// Switches the pipeline and its statistic-bearing blocks to training
    /// mode.
    pub fn train(&self) {
        self.set_training(true);
    }

    /// Switches the pipeline and its statistic-bearing blocks to evaluation
    /// mode. Inference becomes pure and reproducible.
    pub fn eval(&self) {
        self.set_training(false);
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
        if let Some(norm) = &self.norm_in {
            norm.set_training(training);
        }
        if let Some(norm) = &self.norm_out {
            norm.set_training(training);
        }
    }

    /// Returns `true` while the pipeline accumulates statistics.
    pub fn is_training(&self) -> bool {
        self.training.get()
    }

    /// The TICA block, when enabled.
    pub fn tica(&self) -> Option<&TicaEngine> {
        self.tica.as_ref()
    }

    /// Mutable access to the TICA block, e.g. to adjust regularization
    /// between epochs.
    pub fn tica_mut(&mut self) -> Option<&mut TicaEngine> {
        self.tica.as_mut()
    }

    /// The input standardization block, when enabled.
    pub fn norm_in(&self) -> Option<&Normalization> {
        self.norm_in.as_ref()
    }

    /// Applies input standardization and the featurizer, skipping the
    /// projection and output blocks.
    fn featurize(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut value = match &self.norm_in {
            Some(norm) => norm.forward(input)?,
            None => input.clone(),
        };
        if let Some(nn) = &self.nn {
            value = nn.forward(&value)?;
        }
        Ok(value)
    }

    fn metric_prefix(&self) -> &'static str {
        if self.training.get() {
            "train"
        } else {
            "valid"
        }
    }
}

impl CollectiveVariable for DeepTicaCv {
    fn in_features(&self) -> usize {
        self.in_features
    }

    fn out_features(&self) -> usize {
        self.out_features
    }

    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut value = self.featurize(input)?;
        if let Some(tica) = &self.tica {
            value = tica.project(&value)?;
        }
        if let Some(norm) = &self.norm_out {
            value = norm.forward(&value)?;
        }
        Ok(value)
    }
}

impl Trainable for DeepTicaCv {
    type Batch = TimeLagBatch;

    fn training_step(
        &mut self,
        batch: &TimeLagBatch,
        step: u64,
        sink: &dyn MetricSink,
    ) -> PureResult<f32> {
        // Featurize both halves of the pair before borrowing the engine.
        let z_t = match &self.norm_in {
            Some(norm) => norm.forward(&batch.data)?,
            None => batch.data.clone(),
        };
        let z_lag = match &self.norm_in {
            Some(norm) => norm.forward(&batch.data_lag)?,
            None => batch.data_lag.clone(),
        };
        let (h_t, h_lag) = match &self.nn {
            Some(nn) => (nn.forward(&z_t)?, nn.forward(&z_lag)?),
            None => (z_t.clone(), z_lag.clone()),
        };

        let Some(tica) = self.tica.as_mut() else {
            return Err(TensorError::configuration(
                "deep_tica training requires an enabled tica block",
            ));
        };
        let decomposition = tica.compute(&h_t, &h_lag, &batch.weights, &batch.weights_lag, true)?;
        let score = reduce_eigenvalues(
            &decomposition.eigenvalues,
            self.loss.mode,
            self.loss.n_eig,
        )?;
        let loss = -score;

        let mut grad = reduce_eigenvalues_grad(
            &decomposition.eigenvalues,
            self.loss.mode,
            self.loss.n_eig,
        )?;
        for value in grad.iter_mut() {
            *value = -*value;
        }
        let (grad_t, grad_lag) = tica.backward(&grad)?;
        if let Some(nn) = self.nn.as_mut() {
            nn.backward(&z_t, &grad_t)?;
            nn.backward(&z_lag, &grad_lag)?;
        }

        // One discarded full pass so the output standardization sees the
        // freshly projected components. The input normalization already
        // folded this batch above, so it stays frozen here.
        if self.training.get() && self.norm_out.is_some() {
            if let Some(norm) = &self.norm_in {
                norm.eval();
            }
            let extra = self.forward(&batch.data);
            if let Some(norm) = &self.norm_in {
                norm.train();
            }
            extra?;
        }

        let prefix = self.metric_prefix();
        sink.record(&format!("{prefix}_loss"), loss as f64, step);
        for (idx, &value) in decomposition.eigenvalues.iter().enumerate() {
            sink.record(
                &format!("{prefix}_eigval_{}", idx + 1),
                value as f64,
                step,
            );
        }
        debug!(
            target: "mdcv::cvs",
            step,
            loss,
            leading = decomposition.eigenvalues.first().copied().unwrap_or(f32::NAN),
            "deep_tica step"
        );
        Ok(loss)
    }

    fn zero_accumulators(&mut self) -> PureResult<()> {
        if let Some(nn) = self.nn.as_mut() {
            nn.zero_accumulators()?;
        }
        Ok(())
    }

    fn apply_step(&mut self, learning_rate: f32) -> PureResult<()> {
        if let Some(nn) = self.nn.as_mut() {
            nn.apply_step(learning_rate)?;
        }
        Ok(())
    }

    fn loss_description(&self) -> &'static str {
        match self.loss.mode {
            ReductionMode::Sum => "-sum(eigvals)",
            ReductionMode::Sum2 => "-sum2(eigvals)",
            ReductionMode::Gap => "-gap(eigvals)",
        }
    }
}

impl Lifecycle for DeepTicaCv {
    fn on_train_epoch_start(&mut self) -> PureResult<()> {
        self.train();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvs::options::BlockOption;
    use crate::dataset::TimeLaggedDataset;
    use crate::layers::{Activation, NormalizationOptions};
    use mdcv_metrics::MemorySink;

    fn bare_options() -> DeepTicaOptions {
        DeepTicaOptions {
            norm_in: BlockOption::Toggle(false),
            tica: BlockOption::Toggle(false),
            norm_out: BlockOption::Toggle(false),
            ..DeepTicaOptions::default()
        }
    }

    fn sample_batch() -> TimeLagBatch {
        let trajectory = Tensor::random_normal(40, 2, 0.0, 1.0, Some(11)).unwrap();
        let dataset = TimeLaggedDataset::from_trajectory(&trajectory, 1, None).unwrap();
        dataset.loader().iter().next().unwrap().unwrap()
    }

    #[test]
    fn disabled_blocks_reduce_to_the_network() {
        let cv = DeepTicaCv::new(&[2, 5, 2], bare_options()).unwrap();
        let nn = FeedForward::new("deep_tica::nn", &[2, 5, 2], Activation::default()).unwrap();
        let input = Tensor::random_normal(8, 2, 0.0, 1.0, Some(3)).unwrap();
        // Seeded initialization keys off the layer name, so both networks
        // hold identical weights.
        assert_eq!(
            cv.forward(&input).unwrap(),
            nn.forward(&input).unwrap()
        );
    }

    #[test]
    fn training_requires_the_tica_block() {
        let mut cv = DeepTicaCv::new(&[2, 5, 2], bare_options()).unwrap();
        let batch = sample_batch();
        let sink = MemorySink::new();
        assert!(matches!(
            cv.training_step(&batch, 0, &sink),
            Err(TensorError::Configuration { .. })
        ));
    }

    #[test]
    fn training_step_emits_loss_and_eigenvalues() {
        let mut cv = DeepTicaCv::new(&[2, 6, 2], DeepTicaOptions::default()).unwrap();
        let batch = sample_batch();
        let sink = MemorySink::new();
        let loss = cv.training_step(&batch, 3, &sink).unwrap();
        assert!(loss.is_finite());
        assert_eq!(sink.values_for("train_loss").len(), 1);
        assert_eq!(sink.values_for("train_eigval_1").len(), 1);
        assert_eq!(sink.values_for("train_eigval_2").len(), 1);
        assert!(sink.snapshot().iter().all(|record| record.step == 3));
    }

    #[test]
    fn eval_mode_forward_is_reproducible() {
        let mut cv = DeepTicaCv::new(&[2, 6, 1], DeepTicaOptions::default()).unwrap();
        let batch = sample_batch();
        let sink = MemorySink::new();
        for step in 0..4 {
            cv.zero_accumulators().unwrap();
            cv.training_step(&batch, step, &sink).unwrap();
            cv.apply_step(0.01).unwrap();
        }
        cv.eval();
        let input = Tensor::random_normal(5, 2, 0.0, 1.0, Some(29)).unwrap();
        let first = cv.forward(&input).unwrap();
        let second = cv.forward(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.shape(), (5, 1));
        first.guard_finite("deep_tica_eval_forward").unwrap();
    }

    #[test]
    fn input_statistics_fold_each_batch_half_exactly_once() {
        let mut cv = DeepTicaCv::new(&[2, 6, 2], DeepTicaOptions::default()).unwrap();
        let batch = sample_batch();
        let sink = MemorySink::new();
        cv.train();
        cv.training_step(&batch, 0, &sink).unwrap();

        // Reference block that sees the two batch halves once each; the
        // discarded statistics pass must not fold the `t` half again.
        let reference = Normalization::new(2, NormalizationOptions::default()).unwrap();
        reference.forward(&batch.data).unwrap();
        reference.forward(&batch.data_lag).unwrap();

        let norm_in = cv.norm_in().unwrap();
        assert_eq!(norm_in.running_mean(), reference.running_mean());
        assert_eq!(norm_in.running_var(), reference.running_var());
        // The block itself stays in training mode for the next step.
        let before = norm_in.running_mean();
        norm_in.forward(&batch.data).unwrap();
        assert_ne!(norm_in.running_mean(), before);
    }

    #[test]
    fn out_features_larger_than_latent_width_is_rejected() {
        let options = DeepTicaOptions {
            out_features: Some(3),
            ..DeepTicaOptions::default()
        };
        let err = DeepTicaCv::new(&[2, 5, 2], options).unwrap_err();
        assert!(matches!(err, TensorError::Configuration { .. }));
    }

    #[test]
    fn eval_steps_log_under_the_valid_prefix() {
        let mut cv = DeepTicaCv::new(&[2, 6, 2], DeepTicaOptions::default()).unwrap();
        let batch = sample_batch();
        let sink = MemorySink::new();
        cv.eval();
        cv.training_step(&batch, 0, &sink).unwrap();
        assert_eq!(sink.values_for("valid_loss").len(), 1);
        assert!(sink.values_for("train_loss").is_empty());
    }
}
