// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

use crate::layers::activation::{Activation, Relu, Tanh};
use crate::layers::linear::Linear;
use crate::layers::sequential::Sequential;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Configurable stack of affine layers and nonlinearities producing the
/// learned featurization. The last layer stays linear so the downstream
/// statistics see an unbounded feature space.
pub struct FeedForward {
    stack: Sequential,
    in_features: usize,
    out_features: usize,
}

impl core::fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "FeedForward(in={},out={},layers={})",
            self.in_features,
            self.out_features,
            self.stack.len()
        )
    }
}

impl FeedForward {
    /// Builds a feed-forward featurizer from the neurons-per-layer list.
    ///
    /// `layers` must name at least an input and an output width, all nonzero;
    /// anything else is a configuration error raised before any tensor is
    /// allocated.
    pub fn new(name: impl Into<String>, layers: &[usize], activation: Activation) -> PureResult<Self> {
        if layers.len() < 2 {
            return Err(TensorError::configuration(format!(
                "feed-forward needs at least input and output widths, got {layers:?}"
            )));
        }
        if let Some(position) = layers.iter().position(|&width| width == 0) {
            return Err(TensorError::configuration(format!(
                "feed-forward layer {position} has zero width in {layers:?}"
            )));
        }
        let name = name.into();
        let mut stack = Sequential::new();
        let last = layers.len() - 2;
        for (idx, pair) in layers.windows(2).enumerate() {
            stack.push(Linear::new(format!("{name}::fc{idx}"), pair[0], pair[1])?);
            if idx < last {
                match activation {
                    Activation::Relu => stack.push(Relu::new()),
                    Activation::Tanh => stack.push(Tanh::new()),
                }
            }
        }
        Ok(Self {
            stack,
            in_features: layers[0],
            out_features: layers[layers.len() - 1],
        })
    }

    /// Width of the raw input the featurizer expects.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Width of the produced feature space.
    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for FeedForward {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != self.in_features {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: (input.shape().0, self.in_features),
            });
        }
        self.stack.forward(input)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.stack.backward(input, grad_output)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stack.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stack.visit_parameters_mut(visitor)
    }
}
