//! Feeding token batches to the first pipeline stage.
//!
//! A [`Dataset`] hands out tokenized examples as [`Features`] maps, a
//! [`Sampler`] decides the visiting order per epoch, and a [`DataCollator`]
//! stacks (and pads) a list of examples into a [`Batch`] of tensors.
//! [`DataLoader`] ties the three together.

pub mod collate;
pub mod loader;
pub mod sampler;

pub use collate::{
    default_data_collator, Batch, DataCollator, DataCollatorForLanguageModeling,
    DataCollatorForTokenClassification, DataCollatorWithPadding, DefaultDataCollator,
    FeatureValue, Features, Padding, IGNORE_INDEX,
};
pub use loader::DataLoader;
pub use sampler::{RandomSampler, Sampler, SequentialSampler};

/// Indexed access to tokenized examples.
///
/// Lookups are fallible: a sampler that hands out an index past the end gets
/// `None` rather than a panic, and the loader reports it as a batch error.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The example at `index`, or `None` past the end.
    fn get(&self, index: usize) -> Option<Features>;
}

impl Dataset for Vec<Features> {
    fn len(&self) -> usize {
        <[Features]>::len(self)
    }

    fn get(&self, index: usize) -> Option<Features> {
        <[Features]>::get(self, index).cloned()
    }
}

/// Several loaders (one per pipeline stage, say) can share one dataset.
impl<D: Dataset + ?Sized> Dataset for std::sync::Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Option<Features> {
        (**self).get(index)
    }
}
