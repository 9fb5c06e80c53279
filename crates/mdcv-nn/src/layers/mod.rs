// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

pub mod activation;
pub mod feed_forward;
pub mod linear;
pub mod normalization;
pub mod sequential;

pub use activation::{Activation, Relu, Tanh};
pub use feed_forward::FeedForward;
pub use linear::Linear;
pub use normalization::{Normalization, NormalizationOptions};
pub use sequential::Sequential;
