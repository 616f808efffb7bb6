//! Training configuration.
//!
//! A plain struct threaded explicitly through constructors. Nothing in the
//! crate reads configuration from global state.

use crate::error::{Error, Result};
use crate::precision::Precision;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Arguments shared by the model, the precision wrapper and the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArgs {
    /// Number of pipeline stages.
    pub pipeline_model_parallel_size: usize,
    /// Model chunks per pipeline rank under interleaved scheduling.
    pub virtual_pipeline_model_parallel_size: Option<usize>,
    pub fp16: bool,
    pub bf16: bool,
    /// Vocabulary size after padding for efficient partitioning.
    pub padded_vocab_size: usize,
    pub hidden_size: usize,
    /// Standard deviation of the normal weight initialisation.
    pub init_method_std: f32,
    /// Tie the output projection to the input embedding.
    pub share_word_embeddings: bool,
    pub seed: u64,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            pipeline_model_parallel_size: 1,
            virtual_pipeline_model_parallel_size: None,
            fp16: false,
            bf16: false,
            padded_vocab_size: 128,
            hidden_size: 16,
            init_method_std: 0.02,
            share_word_embeddings: true,
            seed: 1234,
        }
    }
}

impl TrainingArgs {
    /// Loads arguments from a JSON file; absent fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let args: Self = serde_json::from_str(&raw)?;
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_model_parallel_size == 0 {
            return Err(Error::config("pipeline_model_parallel_size must be at least 1"));
        }
        if self.virtual_pipeline_model_parallel_size == Some(0) {
            return Err(Error::config(
                "virtual_pipeline_model_parallel_size must be at least 1 when set",
            ));
        }
        if self.padded_vocab_size == 0 || self.hidden_size == 0 {
            return Err(Error::config(
                "padded_vocab_size and hidden_size must be non-zero",
            ));
        }
        if self.init_method_std.is_nan() || self.init_method_std <= 0.0 {
            return Err(Error::config("init_method_std must be positive"));
        }
        if self.fp16 && self.bf16 {
            return Err(Error::config("fp16 and bf16 are mutually exclusive"));
        }
        Ok(())
    }

    /// The reduced precision selected by `fp16` / `bf16`, if any.
    pub fn reduced_precision(&self) -> Option<Precision> {
        Precision::from_flags(self.fp16, self.bf16).ok()
    }
}
