//! # stagewise
//!
//! `stagewise` runs a model split into pipeline stages, each stage on its own
//! worker, with two pieces of coordination that such a split needs:
//!
//! - **Precision at the boundaries.** [`models::Float16Module`] keeps a stage's
//!   weights and activations in `f16`/`bf16` while the data entering the first
//!   stage and the outputs leaving the last stage stay `f32`.
//! - **Tied embeddings across stages.** [`models::SharedEmbeddingModule`]
//!   gives the last stage its own copy of the first stage's input embeddings,
//!   brings it into agreement with one all-reduce at construction, and keeps
//!   it there by summing the two gradients every step.
//!
//! Everything runs on CPU. Stages are threads of one process, connected by
//! channels ([`distributed`]).
//!
//! ## Modules
//!
//! - [`mod@tensor`]: dense tensors with runtime shape and dtype.
//! - [`tree`]: nested tensor trees passed between stages.
//! - [`precision`]: tree-wide `f32` <-> `f16`/`bf16` conversion.
//! - [`nn`]: the [`nn::Module`] trait, parameters, embeddings.
//! - [`models`]: the precision wrapper, the shared-embedding coordinator and a
//!   small staged language model.
//! - [`distributed`]: pipeline topology, collectives, the in-process launcher.
//! - [`optim`], [`checkpoint`], [`data`], [`config`], [`logging`].
//!
//! ## Example
//!
//! ```rust
//! use stagewise::precision::{fp32_to_float16, Precision};
//! use stagewise::{DType, Tensor, ValueTree};
//!
//! let hidden = Tensor::new(vec![1.0f32, 2.0], &[2]).unwrap();
//! let tree = ValueTree::tuple([ValueTree::from(hidden), ValueTree::Null]);
//! let half = fp32_to_float16(tree, Precision::Half).unwrap();
//! assert_eq!(half.first_tensor().unwrap().dtype(), DType::F16);
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distributed;
pub mod error;
pub mod logging;
pub mod models;
pub mod nn;
pub mod optim;
pub mod precision;
pub mod tensor;
pub mod tree;

pub use config::TrainingArgs;
pub use error::{Error, Result};
pub use tensor::{DType, DynTensor, Tensor, TensorElem, TensorError};
pub use tree::ValueTree;
