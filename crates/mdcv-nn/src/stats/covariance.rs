// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Weighted covariance estimation from time-lagged sample pairs.
//!
//! Weighting policy: statistics of the `t` and `lag` batches are normalized
//! separately by their own weight sums, and the time-lagged cross covariance
//! uses the `t` weights as pair weights. Scaling every weight by a constant
//! therefore leaves the estimate unchanged. Accumulation runs in `f64`; the
//! caller decides when to convert back to `f32` tensors.

use crate::{PureResult, Tensor, TensorError};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::Deserialize;

/// How the instantaneous covariance `C0` is assembled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum C0Policy {
    /// `C0` from the `t` batch only.
    Instantaneous,
    /// Average of the `t` and `lag` instantaneous covariances (the
    /// reversible estimate). Default.
    #[default]
    Pooled,
}

/// Instantaneous and time-lagged covariance matrices.
#[derive(Clone, Debug)]
pub struct CovarianceEstimate {
    /// Instantaneous covariance, symmetric `d x d`, regularized diagonal.
    pub c0: DMatrix<f64>,
    /// Time-lagged covariance, explicitly symmetrized.
    pub ctau: DMatrix<f64>,
}

impl CovarianceEstimate {
    /// Converts the instantaneous covariance to an `f32` tensor.
    pub fn c0_tensor(&self) -> PureResult<Tensor> {
        matrix_to_tensor(&self.c0)
    }

    /// Converts the time-lagged covariance to an `f32` tensor.
    pub fn ctau_tensor(&self) -> PureResult<Tensor> {
        matrix_to_tensor(&self.ctau)
    }
}

pub(crate) fn matrix_to_tensor(matrix: &DMatrix<f64>) -> PureResult<Tensor> {
    Tensor::from_fn(matrix.nrows(), matrix.ncols(), |r, c| matrix[(r, c)] as f32)
}

/// One mean-centered batch together with its normalized weights.
#[derive(Clone, Debug)]
pub(crate) struct CenteredBatch {
    /// `n x d`, rows centered by the weighted mean.
    pub centered: DMatrix<f64>,
    /// Normalized weights, sum equal to one.
    pub weights: DVector<f64>,
}

pub(crate) fn center(features: &Tensor, weights: &[f32]) -> PureResult<CenteredBatch> {
    let (rows, cols) = features.shape();
    if weights.len() != rows {
        return Err(TensorError::DataLength {
            expected: rows,
            got: weights.len(),
        });
    }
    let mut total = 0.0f64;
    for &w in weights {
        if !(w.is_finite() && w >= 0.0) {
            return Err(TensorError::NonFiniteValue {
                label: "importance_weight",
                value: w,
            });
        }
        total += w as f64;
    }
    if total <= 0.0 {
        return Err(TensorError::InvalidValue {
            label: "importance_weight_sum_nonpositive",
        });
    }
    let normalized = DVector::from_iterator(rows, weights.iter().map(|&w| w as f64 / total));

    let data = features.data();
    let mut mean = vec![0.0f64; cols];
    for (row, &w) in data.chunks(cols).zip(normalized.iter()) {
        for (dst, &value) in mean.iter_mut().zip(row.iter()) {
            *dst += w * value as f64;
        }
    }
    let centered = DMatrix::from_fn(rows, cols, |r, c| data[r * cols + c] as f64 - mean[c]);
    Ok(CenteredBatch {
        centered,
        weights: normalized,
    })
}

/// `Xᵗ diag(w) Y` for centered batches.
fn weighted_product(x: &CenteredBatch, y: &DMatrix<f64>, weights: &DVector<f64>) -> DMatrix<f64> {
    let mut scaled = x.centered.clone();
    for (mut row, &w) in scaled.row_iter_mut().zip(weights.iter()) {
        row *= w;
    }
    scaled.transpose() * y
}

/// Covariance estimator over weighted time-lagged batches, with optional
/// exponential running averaging owned by the estimator.
#[derive(Clone, Debug)]
pub struct CovarianceEstimator {
    policy: C0Policy,
    running_momentum: Option<f64>,
    running: Option<(DMatrix<f64>, DMatrix<f64>)>,
}

impl CovarianceEstimator {
    /// Creates an estimator that recomputes fresh statistics each call.
    pub fn new(policy: C0Policy) -> Self {
        Self {
            policy,
            running_momentum: None,
            running: None,
        }
    }

    /// Enables exponential running averaging with the given blend factor in
    /// `(0, 1]`. A factor of one degenerates to fresh estimates.
    pub fn with_running_average(mut self, momentum: f32) -> PureResult<Self> {
        if !momentum.is_finite() || momentum <= 0.0 || momentum > 1.0 {
            return Err(TensorError::InvalidValue {
                label: "covariance_running_momentum",
            });
        }
        self.running_momentum = Some(momentum as f64);
        Ok(self)
    }

    /// Returns the configured instantaneous-covariance policy.
    pub fn policy(&self) -> C0Policy {
        self.policy
    }

    /// Fraction of the returned estimate contributed by the current batch;
    /// one when running averaging is disabled or on the first call.
    pub(crate) fn fresh_scale(&self) -> f64 {
        match (self.running_momentum, self.running.as_ref()) {
            (Some(momentum), Some(_)) => momentum,
            _ => 1.0,
        }
    }

    /// Estimates `(C0, Ctau)` from one pair of centered batches and adds
    /// `reg_c0` to the `C0` diagonal.
    pub(crate) fn estimate_centered(
        &mut self,
        t: &CenteredBatch,
        lag: &CenteredBatch,
        reg_c0: f32,
    ) -> PureResult<CovarianceEstimate> {
        if t.centered.ncols() != lag.centered.ncols() {
            return Err(TensorError::ShapeMismatch {
                left: (t.centered.nrows(), t.centered.ncols()),
                right: (lag.centered.nrows(), lag.centered.ncols()),
            });
        }
        if t.centered.nrows() != lag.centered.nrows() {
            return Err(TensorError::ShapeMismatch {
                left: (t.centered.nrows(), t.centered.ncols()),
                right: (lag.centered.nrows(), lag.centered.ncols()),
            });
        }
        if !(reg_c0.is_finite() && reg_c0 >= 0.0) {
            return Err(TensorError::InvalidValue {
                label: "reg_c0_negative",
            });
        }

        let mut c0 = match self.policy {
            C0Policy::Instantaneous => weighted_product(t, &t.centered, &t.weights),
            C0Policy::Pooled => {
                let cov_t = weighted_product(t, &t.centered, &t.weights);
                let cov_lag = weighted_product(lag, &lag.centered, &lag.weights);
                (cov_t + cov_lag) * 0.5
            }
        };
        // Pair weights follow the t batch.
        let cross = weighted_product(t, &lag.centered, &t.weights);
        let mut ctau = (&cross + cross.transpose()) * 0.5;

        if let Some(momentum) = self.running_momentum {
            if let Some((acc_c0, acc_ctau)) = self.running.as_ref() {
                c0 = acc_c0 * (1.0 - momentum) + &c0 * momentum;
                ctau = acc_ctau * (1.0 - momentum) + &ctau * momentum;
            }
            self.running = Some((c0.clone(), ctau.clone()));
        }

        let dim = c0.nrows();
        for idx in 0..dim {
            c0[(idx, idx)] += reg_c0 as f64;
        }
        // Positive definiteness must be surfaced here, not deferred until
        // the estimate happens to reach an eigensolve.
        if Cholesky::new(c0.clone()).is_none() {
            return Err(TensorError::NotPositiveDefinite {
                matrix: "C0",
                dim,
                regularization: reg_c0,
            });
        }
        Ok(CovarianceEstimate { c0, ctau })
    }

    /// Estimates `(C0, Ctau)` from raw feature batches and importance
    /// weights.
    pub fn estimate(
        &mut self,
        x_t: &Tensor,
        x_lag: &Tensor,
        w_t: &[f32],
        w_lag: &[f32],
        reg_c0: f32,
    ) -> PureResult<CovarianceEstimate> {
        if x_t.shape() != x_lag.shape() {
            return Err(TensorError::ShapeMismatch {
                left: x_t.shape(),
                right: x_lag.shape(),
            });
        }
        let t = center(x_t, w_t)?;
        let lag = center(x_lag, w_lag)?;
        self.estimate_centered(&t, &lag, reg_c0)
    }
}
