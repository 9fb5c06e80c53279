// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Declarative configuration for CV pipelines.
//!
//! Each optional block is configured by a [`BlockOption`]: a JSON mapping
//! carries explicit options, `false` disables the block, `true` or an absent
//! key selects the block defaults. Defaults are materialized per
//! instantiation, never shared.

use crate::layers::{Activation, NormalizationOptions};
use crate::loss::ReductionMode;
use crate::stats::TicaOptions;
use serde::Deserialize;

/// Presence and configuration of one optional pipeline block.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(untagged)]
pub enum BlockOption<T> {
    /// `true` enables the block with defaults, `false` removes it.
    Toggle(bool),
    /// Explicit options table, block enabled.
    Options(T),
}

impl<T> Default for BlockOption<T> {
    fn default() -> Self {
        BlockOption::Toggle(true)
    }
}

impl<T: Default> BlockOption<T> {
    /// Materializes the block options, `None` when the block is disabled.
    pub fn resolve(self) -> Option<T> {
        match self {
            BlockOption::Toggle(false) => None,
            BlockOption::Toggle(true) => Some(T::default()),
            BlockOption::Options(options) => Some(options),
        }
    }
}

/// Eigenvalue reduction applied by the training objective.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LossOptions {
    /// Spectrum reduction mode.
    pub mode: ReductionMode,
    /// Leading eigenvalues entering the reduction; zero selects all.
    pub n_eig: usize,
}

/// Full configuration of a [`crate::cvs::DeepTicaCv`] pipeline.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeepTicaOptions {
    /// Activation used between hidden layers of the network block.
    pub activation: Activation,
    /// Number of slow modes kept by the projection; defaults to the network
    /// output width.
    pub out_features: Option<usize>,
    /// Input standardization block.
    pub norm_in: BlockOption<NormalizationOptions>,
    /// Projection block.
    pub tica: BlockOption<TicaOptions>,
    /// Output standardization block.
    pub norm_out: BlockOption<NormalizationOptions>,
    /// Training objective.
    pub loss: LossOptions,
}

/// Configuration of a [`crate::cvs::RegressionCv`] pipeline.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegressionOptions {
    /// Activation used between hidden layers.
    pub activation: Activation,
    /// Input standardization block.
    pub norm_in: BlockOption<NormalizationOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_keys_take_defaults() {
        let options: DeepTicaOptions = serde_json::from_str("{}").unwrap();
        assert!(options.norm_in.resolve().is_some());
        assert!(options.tica.resolve().is_some());
        assert_eq!(options.loss.n_eig, 0);
        assert_eq!(options.loss.mode, ReductionMode::Sum2);
    }

    #[test]
    fn false_disables_a_block() {
        let options: DeepTicaOptions =
            serde_json::from_str(r#"{"norm_in": false, "norm_out": false}"#).unwrap();
        assert!(options.norm_in.resolve().is_none());
        assert!(options.norm_out.resolve().is_none());
        assert!(options.tica.resolve().is_some());
    }

    #[test]
    fn mapping_overrides_block_defaults() {
        let options: DeepTicaOptions = serde_json::from_str(
            r#"{
                "activation": "relu",
                "out_features": 1,
                "norm_in": {"momentum": 0.2},
                "tica": {"reg_c0": 0.001},
                "loss": {"mode": "sum", "n_eig": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(options.activation, Activation::Relu);
        assert_eq!(options.out_features, Some(1));
        let norm_in = options.norm_in.resolve().unwrap();
        assert!((norm_in.momentum - 0.2).abs() < 1e-6);
        // Unspecified fields inside a mapping still default.
        assert!((norm_in.epsilon - 1e-6).abs() < 1e-9);
        let tica = options.tica.resolve().unwrap();
        assert!((tica.reg_c0 - 0.001).abs() < 1e-9);
        assert_eq!(options.loss.n_eig, 2);
    }

    #[test]
    fn instances_do_not_share_defaults() {
        let mut first: DeepTicaOptions = serde_json::from_str("{}").unwrap();
        let second: DeepTicaOptions = serde_json::from_str("{}").unwrap();
        first.loss.n_eig = 5;
        assert_eq!(second.loss.n_eig, 0);
    }
}
