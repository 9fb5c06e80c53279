// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Weighted covariance estimation and the differentiable TICA engine.

pub mod covariance;
pub mod eigen;
pub mod tica;

pub use covariance::{C0Policy, CovarianceEstimate, CovarianceEstimator};
pub use eigen::{solve_generalized, GeneralizedEigen};
pub use tica::{EigenDecomposition, TicaEngine, TicaOptions};
