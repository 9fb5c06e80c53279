// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Machine-learned collective variables for molecular dynamics.
//!
//! The crate offers a lightweight `nn.Module` style surface with explicit,
//! hand-written backward passes, weighted time-lagged covariance estimation
//! and a differentiable TICA projection, composed into ready-to-train CV
//! pipelines.

pub mod cvs;
pub mod dataset;
pub mod layers;
pub mod loss;
pub mod module;
pub mod stats;
pub mod trainer;

pub use cvs::{
    BlockOption, CollectiveVariable, DeepTicaCv, DeepTicaOptions, Lifecycle, LossOptions,
    RegressionCv, RegressionOptions, Trainable,
};
pub use dataset::{InMemoryDataset, TimeLagBatch, TimeLaggedDataset};
pub use layers::{
    Activation, FeedForward, Linear, Normalization, NormalizationOptions, Relu, Sequential, Tanh,
};
pub use loss::{reduce_eigenvalues, reduce_eigenvalues_grad, Loss, MeanSquaredError, ReductionMode};
pub use module::{Module, Parameter};
pub use stats::{
    C0Policy, CovarianceEstimate, CovarianceEstimator, EigenDecomposition, GeneralizedEigen,
    TicaEngine, TicaOptions,
};
pub use trainer::{EpochStats, ModuleTrainer};

pub use mdcv_tensor::{PureResult, Tensor, TensorError};
