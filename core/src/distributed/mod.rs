//! # Distributed Training
//!
//! Pipeline parallelism splits a model's layers into ordered **stages**, one
//! per worker, like a bucket brigade: stage 0 embeds the tokens, hands its
//! activations to stage 1, and so on until the last stage produces logits.
//!
//! Two stages are special:
//!
//! * the **first** stage owns the input word embedding;
//! * the **last** stage owns the output projection, which in most language
//!   models is *the same matrix* as the input embedding (weight tying).
//!
//! Once the stages live on different workers, "the same matrix" has to become
//! two copies kept equal by communication. The workers that hold them form
//! the **embedding group**, and an **All-Reduce** inside that group is what
//! keeps the copies in agreement (see [`crate::models::shared_embeddings`]).
//!
//! ## Module Contents
//!
//! * [`CollectiveBackend`](backend::CollectiveBackend): the interface of a
//!   communication group.
//! * [`CpuBackend`](cpu_backend::CpuBackend): a pure Rust Ring All-Reduce for
//!   workers running as threads.
//! * [`ParallelState`](state::ParallelState) and
//!   [`PipelineTopology`](state::PipelineTopology): stage queries and group
//!   membership of one worker.
//! * [`initialize_model_parallel`](launch::initialize_model_parallel): builds
//!   the state of every rank of an in-process pipeline.
//! * [`run_pipeline_forward`](pipeline::run_pipeline_forward): drives one
//!   forward pass across stage threads.

pub mod backend;
pub mod cpu_backend;
pub mod launch;
pub mod pipeline;
pub mod state;

pub use backend::CollectiveBackend;
pub use cpu_backend::CpuBackend;
pub use launch::initialize_model_parallel;
pub use pipeline::{run_pipeline_forward, PipelineStage};
pub use state::{ParallelState, PipelineTopology};
