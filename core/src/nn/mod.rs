//! Layers, parameters and the [`Module`] trait.

pub mod embedding;
pub mod init;
pub mod module;
pub mod parameter;

pub use embedding::VocabParallelEmbedding;
pub use init::{init_method_normal, init_method_normal_seeded, zeros_init, InitMethod};
pub use module::{Module, StateDict};
pub use parameter::{param_is_not_shared, Parameter};
