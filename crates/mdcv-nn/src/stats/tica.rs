// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Time-lagged independent component analysis over learned features.
//!
//! The engine composes the covariance estimator and the generalized
//! eigensolver and keeps the pieces a training loop needs: a cached
//! projection for inference and the differentiation context that maps
//! eigenvalue gradients back onto the feature batches. The loss only ever
//! consumes eigenvalues, so the backward pass uses the first-order identity
//! `∂λ = vᵗ(∂Ctau − λ ∂C0)v` for C0-orthonormal eigenvectors; it stays
//! finite even when eigenvalues collide, although it can grow large there.

use crate::stats::covariance::{
    center, matrix_to_tensor, C0Policy, CenteredBatch, CovarianceEstimator,
};
use crate::stats::eigen::solve_generalized;
use crate::{PureResult, Tensor, TensorError};
use nalgebra::DMatrix;
use serde::Deserialize;

/// Options accepted by the [`TicaEngine`] block.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TicaOptions {
    /// Diagonal regularization added to `C0` before factorization.
    pub reg_c0: f32,
    /// Instantaneous-covariance assembly policy.
    pub policy: C0Policy,
    /// Exponential blend factor for running covariance averaging; `None`
    /// recomputes fresh statistics every call.
    pub running_momentum: Option<f32>,
}

impl Default for TicaOptions {
    fn default() -> Self {
        Self {
            reg_c0: 1e-6,
            policy: C0Policy::default(),
            running_momentum: None,
        }
    }
}

/// Ordered eigenpairs produced by one decomposition.
#[derive(Clone, Debug)]
pub struct EigenDecomposition {
    /// Eigenvalues sorted descending, ties broken by solver index.
    pub eigenvalues: Vec<f32>,
    /// `d x k` eigenvector matrix; column `i` pairs with `eigenvalues[i]`.
    pub eigenvectors: Tensor,
}

#[derive(Clone, Debug)]
struct TicaContext {
    t: CenteredBatch,
    lag: CenteredBatch,
    fresh_scale: f64,
    values: Vec<f64>,
    vectors: DMatrix<f64>,
}

/// Stateful TICA unit: covariance estimation, eigensolve and projection.
#[derive(Clone, Debug)]
pub struct TicaEngine {
    in_features: usize,
    out_features: usize,
    reg_c0: f32,
    estimator: CovarianceEstimator,
    /// Cached projection eigenvectors, `d x k`. Starts as the truncated
    /// identity so projection is well-defined before the first decomposition.
    projection: Tensor,
    context: Option<TicaContext>,
}

impl TicaEngine {
    /// Creates an engine mapping `in_features` inputs onto `out_features`
    /// components. Requesting more components than features is rejected here,
    /// before any tensor work.
    pub fn new(in_features: usize, out_features: usize, options: TicaOptions) -> PureResult<Self> {
        if in_features == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: 1,
                cols: in_features,
            });
        }
        if out_features == 0 || out_features > in_features {
            return Err(TensorError::configuration(format!(
                "tica out_features must satisfy 1 <= k <= {in_features}, got {out_features}"
            )));
        }
        if !(options.reg_c0.is_finite() && options.reg_c0 >= 0.0) {
            return Err(TensorError::InvalidValue {
                label: "tica_reg_c0",
            });
        }
        let mut estimator = CovarianceEstimator::new(options.policy);
        if let Some(momentum) = options.running_momentum {
            estimator = estimator.with_running_average(momentum)?;
        }
        let projection =
            Tensor::from_fn(in_features, out_features, |r, c| if r == c { 1.0 } else { 0.0 })?;
        Ok(Self {
            in_features,
            out_features,
            reg_c0: options.reg_c0,
            estimator,
            projection,
            context: None,
        })
    }

    /// Feature width consumed by the engine.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Number of components produced by the projection.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Current diagonal regularization.
    pub fn reg_c0(&self) -> f32 {
        self.reg_c0
    }

    /// Updates the regularization used by subsequent calls. Past
    /// decompositions are unaffected.
    pub fn set_regularization(&mut self, reg_c0: f32) -> PureResult<()> {
        if !(reg_c0.is_finite() && reg_c0 >= 0.0) {
            return Err(TensorError::InvalidValue {
                label: "tica_reg_c0",
            });
        }
        self.reg_c0 = reg_c0;
        Ok(())
    }

    /// The cached projection eigenvectors, `d x k`.
    pub fn projection(&self) -> &Tensor {
        &self.projection
    }

    fn guard_features(&self, features: &Tensor) -> PureResult<()> {
        let (rows, cols) = features.shape();
        if cols != self.in_features {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.in_features),
            });
        }
        Ok(())
    }

    /// Runs covariance estimation and the generalized eigensolve on one
    /// weighted time-lagged feature batch.
    ///
    /// With `save_params` the freshly computed eigenvectors replace the
    /// cached projection used by [`TicaEngine::project`]; without it the
    /// decomposition is a throwaway computation. The differentiation context
    /// is cached either way for [`TicaEngine::backward`].
    pub fn compute(
        &mut self,
        x_t: &Tensor,
        x_lag: &Tensor,
        w_t: &[f32],
        w_lag: &[f32],
        save_params: bool,
    ) -> PureResult<EigenDecomposition> {
        self.guard_features(x_t)?;
        self.guard_features(x_lag)?;
        if x_t.shape() != x_lag.shape() {
            return Err(TensorError::ShapeMismatch {
                left: x_t.shape(),
                right: x_lag.shape(),
            });
        }

        let t = center(x_t, w_t)?;
        let lag = center(x_lag, w_lag)?;
        let fresh_scale = self.estimator.fresh_scale();
        let estimate = self.estimator.estimate_centered(&t, &lag, self.reg_c0)?;
        let solution = solve_generalized(
            &estimate.c0,
            &estimate.ctau,
            self.out_features,
            self.reg_c0,
        )?;

        let eigenvalues: Vec<f32> = solution.values.iter().map(|&v| v as f32).collect();
        let eigenvectors = matrix_to_tensor(&solution.vectors)?;
        eigenvectors.guard_finite("tica_eigenvectors")?;
        if save_params {
            self.projection = eigenvectors.clone();
        }
        self.context = Some(TicaContext {
            t,
            lag,
            fresh_scale,
            values: solution.values.clone(),
            vectors: solution.vectors,
        });

        Ok(EigenDecomposition {
            eigenvalues,
            eigenvectors,
        })
    }

    /// Maps eigenvalue gradients back to gradients with respect to the two
    /// feature batches of the last [`TicaEngine::compute`] call.
    pub fn backward(&self, grad_eigenvalues: &[f32]) -> PureResult<(Tensor, Tensor)> {
        let ctx = self.context.as_ref().ok_or(TensorError::InvalidValue {
            label: "tica_backward_before_compute",
        })?;
        if grad_eigenvalues.len() != ctx.values.len() {
            return Err(TensorError::DataLength {
                expected: ctx.values.len(),
                got: grad_eigenvalues.len(),
            });
        }

        let dim = self.in_features;
        // dL/dCtau = Σ gᵢ vᵢvᵢᵗ, dL/dC0 = -Σ gᵢ λᵢ vᵢvᵢᵗ.
        let mut grad_ctau = DMatrix::<f64>::zeros(dim, dim);
        let mut grad_c0 = DMatrix::<f64>::zeros(dim, dim);
        for (idx, &g) in grad_eigenvalues.iter().enumerate() {
            let g = g as f64;
            if g == 0.0 {
                continue;
            }
            let v = ctx.vectors.column(idx);
            let outer = &v * v.transpose();
            grad_ctau += &outer * g;
            grad_c0 += &outer * (-g * ctx.values[idx]);
        }

        // Cross-covariance term; pair weights follow the t batch.
        let mut grad_t = row_scaled(&(&ctx.lag.centered * &grad_ctau), &ctx.t.weights);
        let mut grad_lag = row_scaled(&(&ctx.t.centered * &grad_ctau), &ctx.t.weights);

        // Instantaneous term, split across batches under the pooled policy.
        match self.estimator.policy() {
            C0Policy::Instantaneous => {
                grad_t += row_scaled(&(&ctx.t.centered * &grad_c0), &ctx.t.weights) * 2.0;
            }
            C0Policy::Pooled => {
                grad_t += row_scaled(&(&ctx.t.centered * &grad_c0), &ctx.t.weights);
                grad_lag += row_scaled(&(&ctx.lag.centered * &grad_c0), &ctx.lag.weights);
            }
        }

        subtract_mean_gradient(&mut grad_t, &ctx.t.weights);
        subtract_mean_gradient(&mut grad_lag, &ctx.lag.weights);

        if ctx.fresh_scale != 1.0 {
            grad_t *= ctx.fresh_scale;
            grad_lag *= ctx.fresh_scale;
        }

        Ok((matrix_to_tensor(&grad_t)?, matrix_to_tensor(&grad_lag)?))
    }

    /// Projects features onto the cached eigenvectors.
    pub fn project(&self, features: &Tensor) -> PureResult<Tensor> {
        self.guard_features(features)?;
        features.matmul(&self.projection)
    }
}

fn row_scaled(matrix: &DMatrix<f64>, weights: &nalgebra::DVector<f64>) -> DMatrix<f64> {
    let mut scaled = matrix.clone();
    for (mut row, &w) in scaled.row_iter_mut().zip(weights.iter()) {
        row *= w;
    }
    scaled
}

/// Accounts for the weighted mean used when centering: each row loses its
/// weight-share of the column-wise gradient total.
fn subtract_mean_gradient(gradient: &mut DMatrix<f64>, weights: &nalgebra::DVector<f64>) {
    let totals = gradient.row_sum();
    for (mut row, &w) in gradient.row_iter_mut().zip(weights.iter()) {
        for (entry, total) in row.iter_mut().zip(totals.iter()) {
            *entry -= w * total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(d: usize, k: usize) -> TicaEngine {
        TicaEngine::new(d, k, TicaOptions::default()).unwrap()
    }

    fn sample_batch(seed: u64, rows: usize) -> (Tensor, Tensor, Vec<f32>, Vec<f32>) {
        let x_t = Tensor::random_normal(rows, 2, 0.0, 1.0, Some(seed)).unwrap();
        // Correlated follow-up: lag = 0.8 * t + noise.
        let noise = Tensor::random_normal(rows, 2, 0.0, 0.4, Some(seed + 1)).unwrap();
        let mut x_lag = x_t.scale(0.8).unwrap();
        x_lag.add_scaled(&noise, 1.0).unwrap();
        (x_t, x_lag, vec![1.0; rows], vec![1.0; rows])
    }

    #[test]
    fn rejects_too_many_components_at_construction() {
        let err = TicaEngine::new(2, 3, TicaOptions::default()).unwrap_err();
        assert!(matches!(err, TensorError::Configuration { .. }));
    }

    #[test]
    fn compute_is_deterministic() {
        let (x_t, x_lag, w_t, w_lag) = sample_batch(5, 64);
        let mut a = engine(2, 2);
        let mut b = engine(2, 2);
        let left = a.compute(&x_t, &x_lag, &w_t, &w_lag, true).unwrap();
        let right = b.compute(&x_t, &x_lag, &w_t, &w_lag, true).unwrap();
        assert_eq!(left.eigenvalues, right.eigenvalues);
        assert_eq!(left.eigenvectors, right.eigenvectors);
    }

    #[test]
    fn eigenvalues_are_sorted_descending() {
        let (x_t, x_lag, w_t, w_lag) = sample_batch(17, 128);
        let mut tica = engine(2, 2);
        let result = tica.compute(&x_t, &x_lag, &w_t, &w_lag, false).unwrap();
        assert!(result.eigenvalues[0] >= result.eigenvalues[1]);
    }

    #[test]
    fn save_params_controls_projection_cache() {
        let (x_t, x_lag, w_t, w_lag) = sample_batch(23, 64);
        let mut tica = engine(2, 1);
        let before = tica.projection().clone();
        tica.compute(&x_t, &x_lag, &w_t, &w_lag, false).unwrap();
        assert_eq!(tica.projection(), &before);
        let result = tica.compute(&x_t, &x_lag, &w_t, &w_lag, true).unwrap();
        assert_eq!(tica.projection(), &result.eigenvectors);
        let projected = tica.project(&x_t).unwrap();
        assert_eq!(projected.shape(), (64, 1));
    }

    #[test]
    fn projection_before_first_compute_is_truncated_identity() {
        let tica = engine(3, 2);
        let input = Tensor::from_vec(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        let projected = tica.project(&input).unwrap();
        assert_eq!(projected.data(), &[1.0, 2.0]);
    }

    #[test]
    fn backward_before_compute_is_an_error() {
        let tica = engine(2, 1);
        assert!(matches!(
            tica.backward(&[1.0]),
            Err(TensorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let (x_t, x_lag, w_t, w_lag) = sample_batch(31, 24);
        let mut tica = engine(2, 2);
        tica.compute(&x_t, &x_lag, &w_t, &w_lag, false).unwrap();
        let (grad_t, grad_lag) = tica.backward(&[1.0, 1.0]).unwrap();

        let loss = |xt: &Tensor, xl: &Tensor, tica: &mut TicaEngine| -> f64 {
            let result = tica.compute(xt, xl, &w_t, &w_lag, false).unwrap();
            result.eigenvalues.iter().map(|&v| v as f64).sum()
        };

        let eps = 1e-3f32;
        for (perturb_lag, grad) in [(false, &grad_t), (true, &grad_lag)] {
            for entry in [0usize, 7, 30] {
                let mut plus_t = x_t.clone();
                let mut plus_l = x_lag.clone();
                let mut minus_t = x_t.clone();
                let mut minus_l = x_lag.clone();
                if perturb_lag {
                    plus_l.data_mut()[entry] += eps;
                    minus_l.data_mut()[entry] -= eps;
                } else {
                    plus_t.data_mut()[entry] += eps;
                    minus_t.data_mut()[entry] -= eps;
                }
                let numeric = (loss(&plus_t, &plus_l, &mut tica)
                    - loss(&minus_t, &minus_l, &mut tica))
                    / (2.0 * eps as f64);
                let analytic = grad.data()[entry] as f64;
                assert!(
                    (numeric - analytic).abs() < 1e-3 + 0.02 * analytic.abs(),
                    "entry {entry} (lag={perturb_lag}): numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn rank_deficiency_needs_regularization() {
        // Second feature is an exact copy of the first: C0 is singular.
        let base = Tensor::random_normal(32, 1, 0.0, 1.0, Some(41)).unwrap();
        let mut data = Vec::with_capacity(64);
        for &value in base.data() {
            data.push(value);
            data.push(value);
        }
        let x = Tensor::from_vec(32, 2, data).unwrap();
        let w = vec![1.0f32; 32];

        let mut bare = TicaEngine::new(
            2,
            1,
            TicaOptions {
                reg_c0: 0.0,
                ..TicaOptions::default()
            },
        )
        .unwrap();
        assert!(matches!(
            bare.compute(&x, &x, &w, &w, false),
            Err(TensorError::NotPositiveDefinite { matrix: "C0", .. })
        ));

        let mut regularized = TicaEngine::new(
            2,
            1,
            TicaOptions {
                reg_c0: 1e-4,
                ..TicaOptions::default()
            },
        )
        .unwrap();
        regularized.compute(&x, &x, &w, &w, false).unwrap();
    }
}
