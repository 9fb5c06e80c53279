// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Symmetric generalized eigenproblem `Ctau v = λ C0 v` with SPD `C0`.
//!
//! `C0` is Cholesky-factored (`C0 = L Lᵗ`), the problem is whitened to a
//! standard symmetric eigenproblem `L⁻¹ Ctau L⁻ᵗ u = λ u` and the vectors
//! are mapped back as `v = L⁻ᵗ u`, which makes the columns C0-orthonormal.

use crate::{PureResult, TensorError};
use nalgebra::{DMatrix, SymmetricEigen};
use std::cmp::Ordering;

const EIGEN_MAX_ITERATIONS: usize = 4096;

/// Eigenpairs of the generalized problem, kept in `f64` for the gradient
/// path. Columns of `vectors` correspond 1:1 to `values`.
#[derive(Clone, Debug)]
pub struct GeneralizedEigen {
    /// Eigenvalues sorted descending, ties broken by original solver index.
    pub values: Vec<f64>,
    /// `d x k` matrix of C0-orthonormal eigenvectors.
    pub vectors: DMatrix<f64>,
}

/// Solves for the `k` largest eigenpairs of `Ctau v = λ C0 v`.
///
/// `applied_regularization` is the diagonal shift already added to `C0`; it
/// is only used to compose the error message when the factorization fails.
pub fn solve_generalized(
    c0: &DMatrix<f64>,
    ctau: &DMatrix<f64>,
    k: usize,
    applied_regularization: f32,
) -> PureResult<GeneralizedEigen> {
    let dim = c0.nrows();
    if c0.ncols() != dim || ctau.nrows() != dim || ctau.ncols() != dim {
        return Err(TensorError::ShapeMismatch {
            left: (c0.nrows(), c0.ncols()),
            right: (ctau.nrows(), ctau.ncols()),
        });
    }
    if k == 0 || k > dim {
        return Err(TensorError::configuration(format!(
            "requested {k} eigenpairs from a {dim}-dimensional problem; \
             out_features must satisfy 1 <= k <= {dim}"
        )));
    }

    let cholesky = nalgebra::Cholesky::new(c0.clone()).ok_or(TensorError::NotPositiveDefinite {
        matrix: "C0",
        dim,
        regularization: applied_regularization,
    })?;
    let lower = cholesky.l();

    // Whitening: A = L⁻¹ Ctau L⁻ᵗ, symmetrized against round-off.
    let half = lower
        .solve_lower_triangular(ctau)
        .ok_or(TensorError::NotPositiveDefinite {
            matrix: "C0",
            dim,
            regularization: applied_regularization,
        })?;
    let whitened = lower
        .solve_lower_triangular(&half.transpose())
        .ok_or(TensorError::NotPositiveDefinite {
            matrix: "C0",
            dim,
            regularization: applied_regularization,
        })?;
    let whitened = (&whitened + whitened.transpose()) * 0.5;

    let eigen = SymmetricEigen::try_new(whitened, f64::EPSILON, EIGEN_MAX_ITERATIONS)
        .ok_or(TensorError::EigenSolverFailed { dim })?;

    let mut order: Vec<(usize, f64)> = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(idx, &value)| (idx, value))
        .collect();
    order.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let upper = lower.transpose();
    let mut values = Vec::with_capacity(k);
    let mut vectors = DMatrix::zeros(dim, k);
    for (slot, &(index, value)) in order.iter().take(k).enumerate() {
        values.push(value);
        let u = eigen.eigenvectors.column(index).into_owned();
        let mut v = upper
            .solve_upper_triangular(&u)
            .ok_or(TensorError::NotPositiveDefinite {
                matrix: "C0",
                dim,
                regularization: applied_regularization,
            })?;
        // Deterministic sign: the entry of largest magnitude is non-negative.
        let mut dominant = 0.0f64;
        for &entry in v.iter() {
            if entry.abs() > dominant.abs() {
                dominant = entry;
            }
        }
        if dominant < 0.0 {
            v = -v;
        }
        vectors.set_column(slot, &v);
    }

    Ok(GeneralizedEigen { values, vectors })
}
