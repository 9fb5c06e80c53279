// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! Dense row-major `f32` matrices used throughout the MDCV stack, together
//! with the error type shared by every fallible operation in the workspace.
//!
//! The surface is intentionally small: collective-variable models only need
//! batched affine algebra, axis reductions and seeded random constructors.
//! Heavier linear algebra (factorizations, eigensolves) lives in `mdcv-nn`
//! on top of nalgebra.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

/// Result alias used across the MDCV crates.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor utilities and the model stack built on them.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor does not match the tensor shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Computation received an empty input which would otherwise panic.
    #[error("{0} must not be empty for this computation")]
    EmptyInput(&'static str),
    /// Numeric guard detected a non-finite value that would otherwise
    /// propagate NaNs.
    #[error("non-finite value detected for {label}: {value}")]
    NonFiniteValue { label: &'static str, value: f32 },
    /// A model or block was constructed or invoked with inconsistent options.
    #[error("invalid configuration: {context}")]
    Configuration { context: String },
    /// A matrix that must be positive definite failed its factorization even
    /// after diagonal regularization.
    #[error(
        "matrix {matrix} ({dim} x {dim}) is not positive definite \
         after adding {regularization} to the diagonal; increase reg_c0"
    )]
    NotPositiveDefinite {
        matrix: &'static str,
        dim: usize,
        regularization: f32,
    },
    /// The iterative symmetric eigensolver did not converge.
    #[error("symmetric eigensolver failed to converge on a {dim} x {dim} matrix")]
    EigenSolverFailed { dim: usize },
    /// Attempted to restore a parameter missing from the state dict.
    #[error("missing parameter '{name}' while loading module state")]
    MissingParameter { name: String },
    /// Generic guard violation for scalar arguments.
    #[error("invalid value: {label}")]
    InvalidValue { label: &'static str },
}

impl TensorError {
    /// Convenience constructor for configuration violations.
    pub fn configuration(context: impl Into<String>) -> Self {
        TensorError::Configuration {
            context: context.into(),
        }
    }
}

/// Row-major matrix of `f32` values.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Tensor {
    fn guard_shape(rows: usize, cols: usize) -> PureResult<()> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        Ok(())
    }

    fn seedable_rng(seed: Option<u64>, label: &str) -> StdRng {
        mdcv_config::rng_from_optional(seed, label)
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::guard_shape(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        })
    }

    /// Creates a tensor from raw data. The vector must hold `rows * cols`
    /// elements in row-major order.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        Self::guard_shape(rows, cols)?;
        if data.len() != rows * cols {
            return Err(TensorError::DataLength {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Constructs a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        Self::guard_shape(rows, cols)?;
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Ok(Self { rows, cols, data })
    }

    /// Constructs a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic, which keeps
    /// tests reproducible. Otherwise the global determinism configuration
    /// decides between derived and entropy seeding.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::guard_shape(rows, cols)?;
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let mut rng = Self::seedable_rng(seed, "mdcv-tensor/uniform");
        let distribution = Uniform::new(min, max);
        let data = (0..rows * cols)
            .map(|_| distribution.sample(&mut rng))
            .collect();
        Ok(Self { rows, cols, data })
    }

    /// Constructs a tensor by sampling a normal distribution.
    pub fn random_normal(
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::guard_shape(rows, cols)?;
        if std <= 0.0 || !std.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let mut rng = Self::seedable_rng(seed, "mdcv-tensor/normal");
        let gaussian = StandardNormal;
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = gaussian.sample(&mut rng);
                mean + std * sample as f32
            })
            .collect();
        Ok(Self { rows, cols, data })
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns the number of stored elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when the tensor stores no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable view of the underlying row-major buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the underlying row-major buffer.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Immutable view of a single row.
    pub fn row(&self, index: usize) -> PureResult<&[f32]> {
        if index >= self.rows {
            return Err(TensorError::ShapeMismatch {
                left: (index, 0),
                right: (self.rows, self.cols),
            });
        }
        Ok(&self.data[index * self.cols..(index + 1) * self.cols])
    }

    /// Matrix multiplication `self @ other`.
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let mut out = vec![0.0f32; self.rows * other.cols];
        for i in 0..self.rows {
            for k in 0..self.cols {
                let lhs = self.data[i * self.cols + k];
                if lhs == 0.0 {
                    continue;
                }
                let rhs_row = &other.data[k * other.cols..(k + 1) * other.cols];
                let out_row = &mut out[i * other.cols..(i + 1) * other.cols];
                for (dst, rhs) in out_row.iter_mut().zip(rhs_row.iter()) {
                    *dst += lhs * rhs;
                }
            }
        }
        Tensor::from_vec(self.rows, other.cols, out)
    }

    /// Returns the transposed tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0f32; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    fn zip_guard(&self, other: &Tensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_guard(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_guard(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - b)
            .collect();
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Returns the tensor scaled by a constant.
    pub fn scale(&self, value: f32) -> PureResult<Tensor> {
        let data = self.data.iter().map(|a| a * value).collect();
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Adds `scale * other` in place.
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        self.zip_guard(other)?;
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst += scale * src;
        }
        Ok(())
    }

    /// Adds a bias row to every row of the tensor.
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::DataLength {
                expected: self.cols,
                got: bias.len(),
            });
        }
        for row in self.data.chunks_mut(self.cols) {
            for (dst, b) in row.iter_mut().zip(bias.iter()) {
                *dst += b;
            }
        }
        Ok(())
    }

    /// Sums the tensor along the batch axis, returning one value per column.
    pub fn sum_axis0(&self) -> Vec<f32> {
        let mut sums = vec![0.0f32; self.cols];
        for row in self.data.chunks(self.cols) {
            for (dst, value) in sums.iter_mut().zip(row.iter()) {
                *dst += value;
            }
        }
        sums
    }

    /// Stacks tensors with identical column counts along the row axis.
    pub fn cat_rows(tensors: &[Tensor]) -> PureResult<Tensor> {
        let first = tensors.first().ok_or(TensorError::EmptyInput("cat_rows"))?;
        let cols = first.cols;
        let mut rows = 0;
        let mut data = Vec::new();
        for tensor in tensors {
            if tensor.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: tensor.shape(),
                    right: (tensor.rows, cols),
                });
            }
            rows += tensor.rows;
            data.extend_from_slice(&tensor.data);
        }
        Tensor::from_vec(rows, cols, data)
    }

    /// Squared L2 norm of every stored element.
    pub fn squared_l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Returns an error when any stored value is not finite.
    pub fn guard_finite(&self, label: &'static str) -> PureResult<()> {
        for &value in &self.data {
            if !value.is_finite() {
                return Err(TensorError::NonFiniteValue { label, value });
            }
        }
        Ok(())
    }
}
