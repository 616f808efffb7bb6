use super::collate::{Batch, DataCollator, DefaultDataCollator, Features};
use super::sampler::{RandomSampler, Sampler, SequentialSampler};
use super::Dataset;
use crate::error::{Error, Result};

/// Data loader.
///
/// Combines a dataset of [`Features`], a sampler and a collator, and yields
/// one collated [`Batch`] per step.
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    sampler: Box<dyn Sampler>,
    collator: Box<dyn DataCollator>,
    drop_last: bool,
}

impl<D: Dataset> DataLoader<D> {
    /// A sequential loader using [`DefaultDataCollator`].
    pub fn new(dataset: D, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            sampler: Box::new(SequentialSampler),
            collator: Box::new(DefaultDataCollator),
            drop_last: false,
        }
    }

    /// Sets the sampler to use.
    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Shuffles with a [`RandomSampler`] seeded by `seed`, or reverts to sequential order.
    pub fn shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        if shuffle {
            self.sampler = Box::new(RandomSampler::new(seed));
        } else {
            self.sampler = Box::new(SequentialSampler);
        }
        self
    }

    pub fn with_collator(mut self, collator: impl DataCollator + 'static) -> Self {
        self.collator = Box::new(collator);
        self
    }

    /// Sets whether to drop the last incomplete batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over one epoch.
    pub fn iter(&self, epoch: u64) -> DataLoaderIter<'_, D> {
        DataLoaderIter {
            loader: self,
            indices: self.sampler.sample(self.dataset.len(), epoch),
            current_idx: 0,
        }
    }
}

/// Iterator for DataLoader.
pub struct DataLoaderIter<'a, D: Dataset> {
    loader: &'a DataLoader<D>,
    indices: Vec<usize>,
    current_idx: usize,
}

impl<D: Dataset> Iterator for DataLoaderIter<'_, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.indices.len() {
            return None;
        }

        let batch_size = self.loader.batch_size;
        let remaining = self.indices.len() - self.current_idx;
        if self.loader.drop_last && remaining < batch_size {
            return None;
        }

        let take = remaining.min(batch_size);
        let batch_indices = &self.indices[self.current_idx..self.current_idx + take];
        self.current_idx += take;

        let dataset = &self.loader.dataset;
        let features = batch_indices
            .iter()
            .map(|&idx| {
                dataset.get(idx).ok_or_else(|| {
                    Error::config(format!(
                        "sampler produced index {idx} for a dataset of {} examples",
                        dataset.len()
                    ))
                })
            })
            .collect::<Result<Vec<Features>>>();

        Some(features.and_then(|features| self.loader.collator.collate(features)))
    }
}
