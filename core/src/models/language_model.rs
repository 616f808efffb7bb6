use crate::config::TrainingArgs;
use crate::distributed::{CollectiveBackend, ParallelState, PipelineTopology};
use crate::error::{Error, Result};
use crate::models::shared_embeddings::{EmbeddingSync, SharedEmbeddingModule, WordEmbeddingsForHead};
use crate::nn::{init_method_normal, init_method_normal_seeded, Module, Parameter, VocabParallelEmbedding};
use crate::tensor::{DynTensor, Tensor, TensorError};
use crate::tree::ValueTree;
use stagewise_kernels::{cpu_matmul_transposed, MatmulDims};

/// One pipeline stage's slice of a tied-embedding language model.
///
/// - The first stage owns the token embedding (`embedding.word_embeddings`)
///   and turns `i64` ids `[batch, seq]` into hidden states `[batch, seq, hidden]`.
/// - Middle stages pass the hidden states on unchanged.
/// - The last stage projects hidden states onto the vocabulary with the
///   transposed embedding table, producing `(logits,)` of shape
///   `[batch, seq, vocab]`.
///
/// In a single-stage pipeline both ends coincide and the projection reuses
/// the input embedding directly.
#[derive(Debug)]
pub struct StagedLanguageModel {
    share_word_embeddings: bool,
    hidden_size: usize,
    embedding: Option<VocabParallelEmbedding>,
    word_embeddings_for_head: WordEmbeddingsForHead,
    embedding_sync: EmbeddingSync,
}

impl StagedLanguageModel {
    /// Builds the part of the model that lives on `state`'s stage.
    ///
    /// Every stage of the pipeline must be built concurrently: the first and
    /// last stage meet in an all-reduce while tying their embeddings.
    pub fn new<B: CollectiveBackend>(args: &TrainingArgs, state: &ParallelState<B>) -> Result<Self> {
        args.validate()?;
        let embedding = if state.is_pipeline_first_stage(false) {
            Some(VocabParallelEmbedding::new(
                args.padded_vocab_size,
                args.hidden_size,
                &init_method_normal_seeded(args.init_method_std, args.seed)?,
            ))
        } else {
            None
        };

        let mut model = Self {
            share_word_embeddings: args.share_word_embeddings,
            hidden_size: args.hidden_size,
            embedding,
            word_embeddings_for_head: WordEmbeddingsForHead::default(),
            embedding_sync: EmbeddingSync::NotRequired,
        };
        if model.share_word_embeddings {
            model.embedding_sync = model.initialize_word_embeddings(state, args, init_method_normal)?;
        }
        Ok(model)
    }

    /// Result of tying the embeddings at construction.
    pub fn embedding_sync(&self) -> EmbeddingSync {
        self.embedding_sync
    }

    fn embed(&self, inputs: &ValueTree) -> Result<DynTensor> {
        let embedding = self
            .embedding
            .as_ref()
            .ok_or_else(|| Error::config("first stage holds no input word embeddings"))?;
        let ids = inputs
            .first_tensor()
            .ok_or_else(|| Error::config("language model input has no token ids"))?
            .as_i64()?;
        embedding.forward(ids)
    }

    /// `hidden @ weight^T`, accumulated in `f32` and returned in `hidden`'s dtype.
    fn project(&self, hidden: &DynTensor, weight: &Parameter) -> Result<DynTensor> {
        let shape = hidden.shape();
        if shape.last() != Some(&self.hidden_size) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.hidden_size],
                got: shape.to_vec(),
            }
            .into());
        }
        let vocab = weight.shape()[0];
        let rows = hidden.numel() / self.hidden_size;

        // The [vocab, hidden] table is already the transposed right operand.
        let table = weight.data().to_f32();
        let x = hidden.to_f32();
        let logits = cpu_matmul_transposed(
            x.data(),
            table.data(),
            MatmulDims {
                m: rows,
                k: self.hidden_size,
                n: vocab,
            },
        )?;

        let mut out_shape = shape[..shape.len() - 1].to_vec();
        out_shape.push(vocab);
        Ok(DynTensor::from_f32(Tensor::new(logits, &out_shape)?, hidden.dtype()))
    }
}

impl Module for StagedLanguageModel {
    fn forward(&self, inputs: ValueTree, topology: &PipelineTopology) -> Result<ValueTree> {
        let hidden = if topology.is_first_stage(false) {
            ValueTree::tuple([ValueTree::Tensor(self.embed(&inputs)?)])
        } else {
            inputs
        };
        if !topology.is_last_stage(false) {
            return Ok(hidden);
        }

        let weight = self.word_embeddings_weight(topology)?;
        let states = hidden
            .first_tensor()
            .ok_or_else(|| Error::config("last stage received no hidden states"))?;
        let logits = self.project(states, weight)?;
        Ok(ValueTree::tuple([ValueTree::Tensor(logits)]))
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        let mut params: Vec<(String, &Parameter)> = self
            .embedding
            .iter()
            .map(|e| ("embedding.word_embeddings.weight".to_string(), &e.weight))
            .collect();
        params.extend(self.word_embeddings_for_head.named_parameters());
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        let mut params: Vec<(String, &mut Parameter)> = self
            .embedding
            .iter_mut()
            .map(|e| ("embedding.word_embeddings.weight".to_string(), &mut e.weight))
            .collect();
        params.extend(self.word_embeddings_for_head.named_parameters_mut());
        params
    }
}

impl SharedEmbeddingModule for StagedLanguageModel {
    fn share_word_embeddings(&self) -> bool {
        self.share_word_embeddings
    }

    fn input_word_embeddings(&self) -> Option<&VocabParallelEmbedding> {
        self.embedding.as_ref()
    }

    fn input_word_embeddings_mut(&mut self) -> Option<&mut VocabParallelEmbedding> {
        self.embedding.as_mut()
    }

    fn word_embeddings_for_head(&self) -> &WordEmbeddingsForHead {
        &self.word_embeddings_for_head
    }

    fn word_embeddings_for_head_mut(&mut self) -> &mut WordEmbeddingsForHead {
        &mut self.word_embeddings_for_head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::CpuBackend;
    use crate::tensor::DType;
    use approx::assert_relative_eq;

    fn args() -> TrainingArgs {
        TrainingArgs {
            padded_vocab_size: 5,
            hidden_size: 3,
            ..TrainingArgs::default()
        }
    }

    fn single() -> ParallelState<CpuBackend> {
        ParallelState::local(PipelineTopology::single_stage())
    }

    #[test]
    fn test_single_stage_logits_use_tied_weights() {
        let model = StagedLanguageModel::new(&args(), &single()).unwrap();
        assert_eq!(model.embedding_sync(), EmbeddingSync::NotRequired);

        let ids = Tensor::new(vec![0i64, 4, 2], &[1, 3]).unwrap();
        let out = model
            .forward(ValueTree::from(ids), single().topology())
            .unwrap();
        let logits = out.first_tensor().unwrap().to_f32();
        assert_eq!(logits.shape(), &[1, 3, 5]);

        // Row i of the logits is table[id_i] . table[v] for every v.
        let table = model.embedding.as_ref().unwrap().weight.data().to_f32();
        let row = |v: usize| &table.data()[v * 3..(v + 1) * 3];
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        for v in 0..5 {
            assert_relative_eq!(logits.data()[5 + v], dot(row(4), row(v)), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_state_dict_keys_per_stage() {
        let first = StagedLanguageModel::new(&args(), &single()).unwrap();
        let keys: Vec<String> = first.state_dict("").into_keys().collect();
        assert_eq!(keys, vec!["embedding.word_embeddings.weight"]);

        let last_state = ParallelState::<CpuBackend>::local(PipelineTopology::new(1, 2).unwrap());
        let last = StagedLanguageModel::new(&args(), &last_state).unwrap();
        let keys: Vec<String> = last.state_dict_for_save_checkpoint("").into_keys().collect();
        assert_eq!(keys, vec!["word_embeddings_for_head.weight"]);
    }

    #[test]
    fn test_middle_stage_is_identity() {
        let state = ParallelState::<CpuBackend>::local(PipelineTopology::new(1, 3).unwrap());
        let model = StagedLanguageModel::new(&args(), &state).unwrap();
        assert!(model.named_parameters().is_empty());

        let hidden = ValueTree::tuple([ValueTree::from(Tensor::<f32>::ones(&[1, 2, 3]))]);
        let out = model.forward(hidden.clone(), state.topology()).unwrap();
        assert_eq!(out, hidden);
    }

    #[test]
    fn test_logits_follow_hidden_dtype() {
        let mut model = StagedLanguageModel::new(&args(), &single()).unwrap();
        model.half();
        let ids = Tensor::new(vec![1i64], &[1, 1]).unwrap();
        let out = model.forward(ValueTree::from(ids), single().topology()).unwrap();
        assert_eq!(out.first_tensor().unwrap().dtype(), DType::F16);
    }

    #[test]
    fn test_wrong_hidden_size_is_rejected() {
        let state = ParallelState::<CpuBackend>::local(PipelineTopology::new(1, 2).unwrap());
        let model = StagedLanguageModel::new(&args(), &state).unwrap();
        let err = model
            .forward(ValueTree::from(Tensor::<f32>::ones(&[1, 4])), state.topology())
            .unwrap_err();
        assert!(matches!(err, Error::Tensor(TensorError::ShapeMismatch { .. })));
    }
}
