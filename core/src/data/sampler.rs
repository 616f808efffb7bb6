//! Strategies for sampling indices from a dataset.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A trait for determining the order of data access.
pub trait Sampler: Send + Sync {
    /// Returns the indices of one epoch over a dataset of `len` items.
    ///
    /// `epoch` lets seeded samplers produce a different, reproducible order
    /// each pass.
    fn sample(&self, len: usize, epoch: u64) -> Vec<usize>;
}

/// Samples elements sequentially, always in the same order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn sample(&self, len: usize, _epoch: u64) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Samples a permutation seeded with `seed + epoch`.
///
/// Every pipeline stage that builds a loader from the same `TrainingArgs`
/// sees the same order, which keeps micro-batches aligned across stages.
#[derive(Debug, Clone, Copy)]
pub struct RandomSampler {
    pub seed: u64,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Sampler for RandomSampler {
    fn sample(&self, len: usize, epoch: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch));
        indices.shuffle(&mut rng);
        indices
    }
}
