//! Pipeline-aware models and the wrappers that run them.
//!
//! - [`StagedLanguageModel`]: one stage's slice of a language model whose
//!   output head is tied to its input embedding.
//! - [`SharedEmbeddingModule`]: creates and synchronises the last stage's copy
//!   of those tied embeddings.
//! - [`Float16Module`]: runs any [`Module`](crate::nn::Module) in `f16`/`bf16`
//!   while callers exchange `f32` at the pipeline boundaries.
//!
//! # Example: a single-stage model in bf16
//!
//! ```rust
//! use stagewise::config::TrainingArgs;
//! use stagewise::distributed::{ParallelState, PipelineTopology, CpuBackend};
//! use stagewise::models::{Float16Module, StagedLanguageModel};
//! use stagewise::nn::Module;
//! use stagewise::tensor::{DType, Tensor};
//! use stagewise::tree::ValueTree;
//!
//! let args = TrainingArgs { bf16: true, padded_vocab_size: 32, hidden_size: 8, ..Default::default() };
//! let state = ParallelState::<CpuBackend>::local(PipelineTopology::single_stage());
//!
//! let model = StagedLanguageModel::new(&args, &state).unwrap();
//! let model = Float16Module::new(model, &args).unwrap();
//!
//! let ids = Tensor::new(vec![1i64, 5, 7], &[1, 3]).unwrap();
//! let out = model.forward(ValueTree::from(ids), state.topology()).unwrap();
//!
//! // Logits come back in full precision.
//! let logits = out.first_tensor().unwrap();
//! assert_eq!(logits.dtype(), DType::F32);
//! assert_eq!(logits.shape(), &[1, 3, 32]);
//! ```

pub mod float16;
pub mod language_model;
pub mod shared_embeddings;

pub use float16::Float16Module;
pub use language_model::StagedLanguageModel;
pub use shared_embeddings::{
    EmbeddingSync, SharedEmbeddingModule, WordEmbeddingsForHead, WORD_EMBEDDINGS_FOR_HEAD_KEY,
};
