// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Scalar reductions over eigenvalue spectra.
//!
//! Training maximizes slow-mode eigenvalues, so the objective is the
//! negated reduction; these helpers return the positive reduction and its
//! gradient and leave the sign to the caller.

use crate::{PureResult, TensorError};
use serde::Deserialize;

/// How a spectrum is collapsed into a single training score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMode {
    /// Plain sum of eigenvalues.
    Sum,
    /// Sum of squared eigenvalues. Default: it weights slow modes more and
    /// is insensitive to eigenvalue sign flips.
    #[default]
    Sum2,
    /// Spectral gap, first eigenvalue minus the second.
    Gap,
}

fn selected(values: &[f32], mode: ReductionMode, n_eig: usize) -> PureResult<&[f32]> {
    if values.is_empty() {
        return Err(TensorError::EmptyInput("eigenvalues"));
    }
    let count = if n_eig == 0 { values.len() } else { n_eig };
    if count > values.len() {
        return Err(TensorError::configuration(format!(
            "eigenvalue reduction over {count} values, but only {} are available",
            values.len()
        )));
    }
    if mode == ReductionMode::Gap && count < 2 {
        return Err(TensorError::configuration(
            "gap reduction needs at least two eigenvalues",
        ));
    }
    Ok(&values[..count])
}

/// Collapses the leading `n_eig` eigenvalues (all of them when zero) into a
/// scalar score.
pub fn reduce_eigenvalues(values: &[f32], mode: ReductionMode, n_eig: usize) -> PureResult<f32> {
    let picked = selected(values, mode, n_eig)?;
    Ok(match mode {
        ReductionMode::Sum => picked.iter().sum(),
        ReductionMode::Sum2 => picked.iter().map(|v| v * v).sum(),
        ReductionMode::Gap => picked[0] - picked[1],
    })
}

/// Gradient of [`reduce_eigenvalues`] with respect to every eigenvalue; the
/// returned vector always matches `values` in length, with zeros for the
/// unselected tail.
pub fn reduce_eigenvalues_grad(
    values: &[f32],
    mode: ReductionMode,
    n_eig: usize,
) -> PureResult<Vec<f32>> {
    let picked = selected(values, mode, n_eig)?;
    let mut grad = vec![0.0f32; values.len()];
    match mode {
        ReductionMode::Sum => {
            for slot in grad.iter_mut().take(picked.len()) {
                *slot = 1.0;
            }
        }
        ReductionMode::Sum2 => {
            for (slot, &value) in grad.iter_mut().zip(picked.iter()) {
                *slot = 2.0 * value;
            }
        }
        ReductionMode::Gap => {
            grad[0] = 1.0;
            grad[1] = -1.0;
        }
    }
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_and_sum2_reductions() {
        let values = [0.9f32, 0.5, 0.1];
        assert!((reduce_eigenvalues(&values, ReductionMode::Sum, 0).unwrap() - 1.5).abs() < 1e-6);
        let sum2 = reduce_eigenvalues(&values, ReductionMode::Sum2, 0).unwrap();
        assert!((sum2 - (0.81 + 0.25 + 0.01)).abs() < 1e-6);
        // n_eig truncates the spectrum.
        assert!((reduce_eigenvalues(&values, ReductionMode::Sum, 2).unwrap() - 1.4).abs() < 1e-6);
    }

    #[test]
    fn gap_reduction_and_gradient() {
        let values = [0.9f32, 0.5, 0.1];
        assert!((reduce_eigenvalues(&values, ReductionMode::Gap, 0).unwrap() - 0.4).abs() < 1e-6);
        let grad = reduce_eigenvalues_grad(&values, ReductionMode::Gap, 0).unwrap();
        assert_eq!(grad, vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn sum2_gradient_scales_with_values() {
        let values = [0.9f32, 0.5];
        let grad = reduce_eigenvalues_grad(&values, ReductionMode::Sum2, 1).unwrap();
        assert!((grad[0] - 1.8).abs() < 1e-6);
        assert_eq!(grad[1], 0.0);
    }

    #[test]
    fn invalid_selections_are_rejected() {
        assert!(matches!(
            reduce_eigenvalues(&[], ReductionMode::Sum, 0),
            Err(TensorError::EmptyInput(_))
        ));
        assert!(matches!(
            reduce_eigenvalues(&[0.5], ReductionMode::Sum, 2),
            Err(TensorError::Configuration { .. })
        ));
        assert!(matches!(
            reduce_eigenvalues(&[0.5], ReductionMode::Gap, 0),
            Err(TensorError::Configuration { .. })
        ));
    }
}
