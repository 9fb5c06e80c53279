// SPDX-License-Identifier: AGPL-3.0-or-later
// Part of MDCV — Licensed under AGPL-3.0-or-later.

//! In-memory datasets and deterministic mini-batch loaders.

use crate::{PureResult, Tensor, TensorError};
use rand::rngs::StdRng;
use rand::{seq::SliceRandom, SeedableRng};
use std::sync::Arc;

type Sample = (Tensor, Tensor);

/// One mini-batch of weighted time-lagged pairs.
#[derive(Clone, Debug)]
pub struct TimeLagBatch {
    /// Frames at time `t`, stacked row-wise.
    pub data: Tensor,
    /// Frames at time `t + lag`, aligned row-for-row with `data`.
    pub data_lag: Tensor,
    /// Importance weights for the `t` frames.
    pub weights: Vec<f32>,
    /// Importance weights for the lagged frames.
    pub weights_lag: Vec<f32>,
}

#[derive(Clone, Debug)]
struct TimeLagSample {
    data: Tensor,
    data_lag: Tensor,
    weight: f32,
    weight_lag: f32,
}

/// Dataset of `(x_t, x_{t+lag})` pairs sliced out of a single trajectory.
#[derive(Clone, Debug)]
pub struct TimeLaggedDataset {
    samples: Arc<[TimeLagSample]>,
    features: usize,
}

impl TimeLaggedDataset {
    /// Builds every `(frame[i], frame[i + lag])` pair from a trajectory of
    /// shape `n x d`. Per-frame importance weights default to one; each pair
    /// carries the weights of its two frames.
    pub fn from_trajectory(
        trajectory: &Tensor,
        lag: usize,
        weights: Option<&[f32]>,
    ) -> PureResult<Self> {
        let (frames, features) = trajectory.shape();
        if lag == 0 || lag >= frames {
            return Err(TensorError::configuration(format!(
                "lag time must satisfy 1 <= lag < {frames}, got {lag}"
            )));
        }
        if let Some(w) = weights {
            if w.len() != frames {
                return Err(TensorError::DataLength {
                    expected: frames,
                    got: w.len(),
                });
            }
            for &value in w {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(TensorError::NonFiniteValue {
                        label: "trajectory_weight",
                        value,
                    });
                }
            }
        }
        let weight_at = |idx: usize| weights.map_or(1.0, |w| w[idx]);

        let mut samples = Vec::with_capacity(frames - lag);
        for idx in 0..frames - lag {
            samples.push(TimeLagSample {
                data: Tensor::from_vec(1, features, trajectory.row(idx)?.to_vec())?,
                data_lag: Tensor::from_vec(1, features, trajectory.row(idx + lag)?.to_vec())?,
                weight: weight_at(idx),
                weight_lag: weight_at(idx + lag),
            });
        }
        Ok(Self {
            samples: samples.into(),
            features,
        })
    }

    /// Number of time-lagged pairs.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when the trajectory produced no pairs.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Feature width of every frame.
    pub fn features(&self) -> usize {
        self.features
    }

    /// Creates a builder-style loader over the pairs.
    pub fn loader(&self) -> TimeLagLoader {
        TimeLagLoader {
            samples: Arc::clone(&self.samples),
            order: default_order(self.samples.len()),
            batch_size: self.samples.len().max(1),
        }
    }
}

fn default_order(len: usize) -> Arc<Vec<usize>> {
    Arc::new((0..len).collect())
}

/// Deterministic mini-batch loader over time-lagged pairs. Defaults to one
/// full-dataset batch; use [`TimeLagLoader::batched`] for mini-batches.
#[derive(Clone)]
pub struct TimeLagLoader {
    samples: Arc<[TimeLagSample]>,
    order: Arc<Vec<usize>>,
    batch_size: usize,
}

impl TimeLagLoader {
    /// Number of pairs referenced by the loader.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when no pairs are referenced.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns a loader with a deterministically shuffled visitation order.
    pub fn shuffle(mut self, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        self.order = Arc::new(indices);
        self
    }

    /// Updates the loader to emit batches of `batch_size` pairs.
    pub fn batched(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Creates an iterator over the configured batches.
    pub fn iter(&self) -> TimeLagBatches {
        TimeLagBatches {
            samples: Arc::clone(&self.samples),
            order: Arc::clone(&self.order),
            batch_size: self.batch_size,
            position: 0,
        }
    }
}

impl IntoIterator for TimeLagLoader {
    type Item = PureResult<TimeLagBatch>;
    type IntoIter = TimeLagBatches;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over stacked [`TimeLagBatch`] values.
pub struct TimeLagBatches {
    samples: Arc<[TimeLagSample]>,
    order: Arc<Vec<usize>>,
    batch_size: usize,
    position: usize,
}

impl Iterator for TimeLagBatches {
    type Item = PureResult<TimeLagBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let start = self.position;
        let end = (self.position + self.batch_size).min(self.order.len());
        self.position = end;
        let indices = &self.order[start..end];

        let mut data = Vec::with_capacity(indices.len());
        let mut data_lag = Vec::with_capacity(indices.len());
        let mut weights = Vec::with_capacity(indices.len());
        let mut weights_lag = Vec::with_capacity(indices.len());
        for &idx in indices {
            let sample = &self.samples[idx];
            data.push(sample.data.clone());
            data_lag.push(sample.data_lag.clone());
            weights.push(sample.weight);
            weights_lag.push(sample.weight_lag);
        }
        let stacked = match Tensor::cat_rows(&data).and_then(|d| {
            Tensor::cat_rows(&data_lag).map(|l| (d, l))
        }) {
            Ok(pair) => pair,
            Err(err) => return Some(Err(err)),
        };
        Some(Ok(TimeLagBatch {
            data: stacked.0,
            data_lag: stacked.1,
            weights,
            weights_lag,
        }))
    }
}

/// Lightweight in-memory dataset that keeps input/target tensors paired
/// together, for supervised objectives.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    /// Creates an empty dataset.
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Builds a dataset from an iterator of `(input, target)` pairs.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Sample>,
    {
        Self {
            samples: iter.into_iter().collect(),
        }
    }

    /// Appends a new sample to the dataset.
    pub fn push(&mut self, input: Tensor, target: Tensor) {
        self.samples.push((input, target));
    }

    /// Returns the number of samples stored in the dataset.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when no samples are registered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Creates a streaming loader over cloned samples.
    pub fn loader(&self) -> SampleLoader {
        SampleLoader {
            samples: self.samples.clone().into(),
            order: default_order(self.samples.len()),
            batch_size: 1,
        }
    }
}

/// Builder-style loader over supervised `(input, target)` samples.
#[derive(Clone)]
pub struct SampleLoader {
    samples: Arc<[Sample]>,
    order: Arc<Vec<usize>>,
    batch_size: usize,
}

impl SampleLoader {
    /// Returns a loader with a deterministically shuffled visitation order.
    pub fn shuffle(mut self, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        self.order = Arc::new(indices);
        self
    }

    /// Updates the loader to emit batches of `batch_size` samples.
    pub fn batched(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Creates an iterator over the configured batches.
    pub fn iter(&self) -> SampleBatches {
        SampleBatches {
            samples: Arc::clone(&self.samples),
            order: Arc::clone(&self.order),
            batch_size: self.batch_size,
            position: 0,
        }
    }
}

impl IntoIterator for SampleLoader {
    type Item = PureResult<Sample>;
    type IntoIter = SampleBatches;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator that stacks supervised samples into fixed-size batches.
pub struct SampleBatches {
    samples: Arc<[Sample]>,
    order: Arc<Vec<usize>>,
    batch_size: usize,
    position: usize,
}

impl Iterator for SampleBatches {
    type Item = PureResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let start = self.position;
        let end = (self.position + self.batch_size).min(self.order.len());
        self.position = end;
        let indices = &self.order[start..end];

        let mut inputs = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());
        for &idx in indices {
            let (input, target) = &self.samples[idx];
            inputs.push(input.clone());
            targets.push(target.clone());
        }
        let input = match Tensor::cat_rows(&inputs) {
            Ok(tensor) => tensor,
            Err(err) => return Some(Err(err)),
        };
        let target = match Tensor::cat_rows(&targets) {
            Ok(tensor) => tensor,
            Err(err) => return Some(Err(err)),
        };
        Some(Ok((input, target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory() -> Tensor {
        Tensor::from_fn(6, 2, |r, c| (r * 2 + c) as f32).unwrap()
    }

    #[test]
    fn trajectory_pairs_align_frames() {
        let dataset = TimeLaggedDataset::from_trajectory(&trajectory(), 2, None).unwrap();
        assert_eq!(dataset.len(), 4);
        let batch = dataset.loader().iter().next().unwrap().unwrap();
        assert_eq!(batch.data.shape(), (4, 2));
        assert_eq!(batch.data_lag.shape(), (4, 2));
        // Row zero pairs frame 0 with frame 2.
        assert_eq!(batch.data.row(0).unwrap(), &[0.0, 1.0]);
        assert_eq!(batch.data_lag.row(0).unwrap(), &[4.0, 5.0]);
        assert_eq!(batch.weights, vec![1.0; 4]);
    }

    #[test]
    fn per_frame_weights_follow_their_frames() {
        let weights = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6];
        let dataset =
            TimeLaggedDataset::from_trajectory(&trajectory(), 1, Some(&weights)).unwrap();
        let batch = dataset.loader().iter().next().unwrap().unwrap();
        assert_eq!(batch.weights, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(batch.weights_lag, vec![0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn invalid_lag_is_rejected() {
        assert!(matches!(
            TimeLaggedDataset::from_trajectory(&trajectory(), 0, None),
            Err(TensorError::Configuration { .. })
        ));
        assert!(matches!(
            TimeLaggedDataset::from_trajectory(&trajectory(), 6, None),
            Err(TensorError::Configuration { .. })
        ));
    }

    #[test]
    fn shuffle_is_deterministic_and_preserves_pairing() {
        let dataset = TimeLaggedDataset::from_trajectory(&trajectory(), 1, None).unwrap();
        let a: Vec<_> = dataset
            .loader()
            .shuffle(7)
            .batched(2)
            .iter()
            .map(|b| b.unwrap())
            .collect();
        let b: Vec<_> = dataset
            .loader()
            .shuffle(7)
            .batched(2)
            .iter()
            .map(|b| b.unwrap())
            .collect();
        assert_eq!(a.len(), 3);
        for (left, right) in a.iter().zip(b.iter()) {
            assert_eq!(left.data, right.data);
            assert_eq!(left.data_lag, right.data_lag);
        }
        // Each t-row still pairs with the frame one step later.
        for batch in &a {
            for row in 0..batch.data.shape().0 {
                let t = batch.data.row(row).unwrap();
                let lag = batch.data_lag.row(row).unwrap();
                assert_eq!(lag[0], t[0] + 2.0);
            }
        }
    }

    #[test]
    fn supervised_batches_stack_rows() {
        let samples = (0..6).map(|i| {
            let input = Tensor::from_vec(1, 2, vec![i as f32, (i + 1) as f32]).unwrap();
            let target = Tensor::from_vec(1, 1, vec![i as f32 * 2.0]).unwrap();
            (input, target)
        });
        let dataset = InMemoryDataset::from_iter(samples);
        let mut batches = dataset.loader().batched(3).iter();
        let first = batches.next().unwrap().unwrap();
        assert_eq!(first.0.shape(), (3, 2));
        assert_eq!(first.1.shape(), (3, 1));
        let second = batches.next().unwrap().unwrap();
        assert_eq!(second.0.shape(), (3, 2));
        assert!(batches.next().is_none());
    }
}
