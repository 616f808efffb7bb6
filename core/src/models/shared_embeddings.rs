//! Keeping the input embedding and the output head in agreement across the pipeline.
//!
//! Language models tie the output projection to the input word embeddings.
//! Once the model is split over pipeline stages the two uses live on
//! different workers: the first stage embeds tokens, the last stage projects
//! hidden states back onto the vocabulary. The last stage therefore holds its
//! own copy of the table, and this module keeps the copies equal:
//!
//! 1. At construction, [`SharedEmbeddingModule::initialize_word_embeddings`]
//!    creates the last stage's copy filled with zeros and sums it with the
//!    first stage's table over the embedding group, so both start from the
//!    first stage's values.
//! 2. Every training step, [`SharedEmbeddingModule::allreduce_word_embedding_grads`]
//!    sums the two gradients, so the optimizer applies the same update to
//!    both copies.
//!
//! The copy is flagged as shared so that gradient-norm computation counts the
//! tied weights once.

use crate::config::TrainingArgs;
use crate::distributed::{CollectiveBackend, ParallelState, PipelineTopology};
use crate::error::{Error, Result};
use crate::nn::{InitMethod, Parameter, VocabParallelEmbedding};
use tracing::{debug, warn};

/// State-dict key under which the last stage stores its copy of the embeddings.
pub const WORD_EMBEDDINGS_FOR_HEAD_KEY: &str = "word_embeddings_for_head";

/// What a synchronisation call did on this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSync {
    /// Single-stage pipeline: input embedding and head are the same tensor.
    NotRequired,
    /// This worker took part in the all-reduce over the embedding group.
    Synchronized,
    /// A middle stage; it holds no embedding table.
    NotParticipating,
    /// The distributed runtime is not up, so nothing was exchanged.
    Skipped,
}

/// Slot for the last stage's copy of the word embeddings. Empty on every other stage.
#[derive(Debug, Clone, Default)]
pub struct WordEmbeddingsForHead {
    embedding: Option<VocabParallelEmbedding>,
}

impl WordEmbeddingsForHead {
    pub fn get(&self) -> Option<&VocabParallelEmbedding> {
        self.embedding.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut VocabParallelEmbedding> {
        self.embedding.as_mut()
    }

    pub fn is_initialized(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn set(&mut self, embedding: VocabParallelEmbedding) {
        self.embedding = Some(embedding);
    }

    /// Parameters of the slot, keyed `word_embeddings_for_head.weight`.
    pub fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.embedding
            .iter()
            .map(|e| (format!("{WORD_EMBEDDINGS_FOR_HEAD_KEY}.weight"), &e.weight))
            .collect()
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.embedding
            .iter_mut()
            .map(|e| (format!("{WORD_EMBEDDINGS_FOR_HEAD_KEY}.weight"), &mut e.weight))
            .collect()
    }
}

/// A model whose first-stage input embedding is tied to its last-stage output head.
///
/// Implementors expose where the two tables live; the provided methods
/// implement creation, synchronisation and role-aware access.
pub trait SharedEmbeddingModule {
    /// Whether input and output embeddings are tied at all.
    fn share_word_embeddings(&self) -> bool;

    /// The token embedding table, present only on the first stage.
    fn input_word_embeddings(&self) -> Option<&VocabParallelEmbedding>;

    fn input_word_embeddings_mut(&mut self) -> Option<&mut VocabParallelEmbedding>;

    fn word_embeddings_for_head(&self) -> &WordEmbeddingsForHead;

    fn word_embeddings_for_head_mut(&mut self) -> &mut WordEmbeddingsForHead;

    /// The embedding table this worker reads, chosen by pipeline role.
    ///
    /// Virtual staging is ignored: every chunk on the first (last) pipeline
    /// rank resolves to that rank's table.
    ///
    /// # Errors
    ///
    /// `Error::Config` on a middle stage, on the last stage when sharing is
    /// disabled, and when the selected table does not exist yet.
    fn word_embeddings_weight(&self, topology: &PipelineTopology) -> Result<&Parameter> {
        if topology.is_first_stage(true) {
            return self
                .input_word_embeddings()
                .map(|e| &e.weight)
                .ok_or_else(|| Error::config("first stage holds no input word embeddings"));
        }
        if topology.is_last_stage(true) {
            if !self.share_word_embeddings() {
                return Err(Error::config(
                    "word_embeddings_weight() called for last stage, but share_word_embeddings is false",
                ));
            }
            return self
                .word_embeddings_for_head()
                .get()
                .map(|e| &e.weight)
                .ok_or_else(|| Error::config("word embeddings for head are not initialized"));
        }
        Err(Error::config(
            "word_embeddings_weight() should be called for first and last stage only",
        ))
    }

    fn word_embeddings_weight_mut(&mut self, topology: &PipelineTopology) -> Result<&mut Parameter> {
        if topology.is_first_stage(true) {
            return self
                .input_word_embeddings_mut()
                .map(|e| &mut e.weight)
                .ok_or_else(|| Error::config("first stage holds no input word embeddings"));
        }
        if topology.is_last_stage(true) {
            if !self.share_word_embeddings() {
                return Err(Error::config(
                    "word_embeddings_weight() called for last stage, but share_word_embeddings is false",
                ));
            }
            return self
                .word_embeddings_for_head_mut()
                .get_mut()
                .map(|e| &mut e.weight)
                .ok_or_else(|| Error::config("word embeddings for head are not initialized"));
        }
        Err(Error::config(
            "word_embeddings_weight() should be called for first and last stage only",
        ))
    }

    /// Creates the last stage's copy of the embeddings and brings it into
    /// agreement with the first stage.
    ///
    /// Every worker of the pipeline calls this while building its model. The
    /// first and the last stage block inside the all-reduce until both have
    /// arrived, so they must run concurrently.
    ///
    /// If the distributed runtime is not initialized the copy stays at zero
    /// and a warning is logged. That is fine for tools that only inspect or
    /// convert a model, and wrong for training.
    ///
    /// # Errors
    ///
    /// `Error::Config` if sharing is disabled; `Error::Comm` if the peer in
    /// the embedding group went away.
    fn initialize_word_embeddings<B, F>(
        &mut self,
        state: &ParallelState<B>,
        args: &TrainingArgs,
        init_method_normal: F,
    ) -> Result<EmbeddingSync>
    where
        B: CollectiveBackend,
        F: Fn(f32) -> Result<InitMethod>,
    {
        if !self.share_word_embeddings() {
            return Err(Error::config(
                "initialize_word_embeddings() was called but share_word_embeddings is false",
            ));
        }

        if state.pipeline_model_parallel_size() == 1 {
            return Ok(EmbeddingSync::NotRequired);
        }

        let is_first = state.is_pipeline_first_stage(false);
        let is_last = state.is_pipeline_last_stage(false);

        if is_last {
            debug_assert!(!is_first, "first and last stage must differ in a multi-stage pipeline");
            let mut embedding = VocabParallelEmbedding::new(
                args.padded_vocab_size,
                args.hidden_size,
                &init_method_normal(args.init_method_std)?,
            );
            embedding.weight.data_mut().zero_();
            embedding.weight.set_shared(true);
            self.word_embeddings_for_head_mut().set(embedding);
        }

        if !state.is_distributed_initialized() {
            warn!(
                "Distributed processes aren't initialized, so word embeddings in the last layer \
                 are not initialized. If you are just manipulating a model this is fine, but this \
                 needs to be handled manually. If you are training something is definitely wrong."
            );
            return Ok(EmbeddingSync::Skipped);
        }

        if !(is_first || is_last) {
            return Ok(EmbeddingSync::NotParticipating);
        }

        let group = state.embedding_group()?;
        let weight = self.word_embeddings_weight_mut(state.topology())?;
        group.all_reduce_sum_dyn(weight.data_mut())?;
        debug!(
            pipeline_rank = state.topology().pipeline_rank(),
            "word embeddings synchronized across the embedding group"
        );
        Ok(EmbeddingSync::Synchronized)
    }

    /// Sums the gradient of the tied embeddings across the first and last
    /// stage, in place. Call after the backward pass and before the optimizer
    /// step.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a participating worker has no gradient for its table.
    fn allreduce_word_embedding_grads<B>(&mut self, state: &ParallelState<B>) -> Result<EmbeddingSync>
    where
        B: CollectiveBackend,
    {
        if state.pipeline_model_parallel_size() == 1 {
            return Ok(EmbeddingSync::NotRequired);
        }
        if !state.is_distributed_initialized() {
            return Ok(EmbeddingSync::Skipped);
        }
        if !(state.is_pipeline_first_stage(true) || state.is_pipeline_last_stage(true)) {
            return Ok(EmbeddingSync::NotParticipating);
        }

        let group = state.embedding_group()?;
        let weight = self.word_embeddings_weight_mut(state.topology())?;
        let grad = weight
            .grad_mut()
            .ok_or_else(|| Error::config("word embeddings have no gradient to all-reduce"))?;
        group.all_reduce_sum_dyn(grad)?;
        Ok(EmbeddingSync::Synchronized)
    }
}
