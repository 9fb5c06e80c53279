// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Supervised baseline CV: a feed-forward map fitted to reference labels.

use crate::cvs::options::RegressionOptions;
use crate::cvs::{CollectiveVariable, Lifecycle, Trainable};
use crate::layers::{FeedForward, Normalization};
use crate::loss::{Loss, MeanSquaredError};
use crate::module::Module;
use crate::{PureResult, Tensor};
use mdcv_metrics::MetricSink;
use std::cell::Cell;

/// Regression pipeline: optional input standardization followed by a
/// feed-forward network trained against target values with mean squared
/// error.
pub struct RegressionCv {
    norm_in: Option<Normalization>,
    nn: FeedForward,
    loss: MeanSquaredError,
    training: Cell<bool>,
}

impl RegressionCv {
    /// Builds a regression CV with the given layer widths.
    pub fn new(layers: &[usize], options: RegressionOptions) -> PureResult<Self> {
        let nn = FeedForward::new("regression::nn", layers, options.activation)?;
        let norm_in = match options.norm_in.resolve() {
            Some(norm_options) => Some(Normalization::new(nn.in_features(), norm_options)?),
            None => None,
        };
        Ok(Self {
            norm_in,
            nn,
            loss: MeanSquaredError::new(),
            training: Cell::new(true),
        })
    }

    /// Switches statistic accumulation on.
    pub fn train(&self) {
        self.set_training(true);
    }

    /// Freezes statistics for pure inference.
    pub fn eval(&self) {
        self.set_training(false);
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
        if let Some(norm) = &self.norm_in {
            norm.set_training(training);
        }
    }
}

impl CollectiveVariable for RegressionCv {
    fn in_features(&self) -> usize {
        self.nn.in_features()
    }

    fn out_features(&self) -> usize {
        self.nn.out_features()
    }

    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let value = match &self.norm_in {
            Some(norm) => norm.forward(input)?,
            None => input.clone(),
        };
        self.nn.forward(&value)
    }
}

impl Trainable for RegressionCv {
    type Batch = (Tensor, Tensor);

    fn training_step(
        &mut self,
        batch: &(Tensor, Tensor),
        step: u64,
        sink: &dyn MetricSink,
    ) -> PureResult<f32> {
        let (input, target) = batch;
        let value = match &self.norm_in {
            Some(norm) => norm.forward(input)?,
            None => input.clone(),
        };
        let prediction = self.nn.forward(&value)?;
        let loss = self.loss.forward(&prediction, target)?;
        let grad = self.loss.backward(&prediction, target)?;
        self.nn.backward(&value, &grad)?;

        let name = if self.training.get() {
            "train_loss"
        } else {
            "valid_loss"
        };
        sink.record(name, loss as f64, step);
        Ok(loss)
    }

    fn zero_accumulators(&mut self) -> PureResult<()> {
        self.nn.zero_accumulators()
    }

    fn apply_step(&mut self, learning_rate: f32) -> PureResult<()> {
        self.nn.apply_step(learning_rate)
    }

    fn loss_description(&self) -> &'static str {
        "mse(prediction, target)"
    }
}

impl Lifecycle for RegressionCv {
    fn on_train_epoch_start(&mut self) -> PureResult<()> {
        self.train();
        Ok(())
    }
}
