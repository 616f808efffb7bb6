use crate::config::TrainingArgs;
use crate::distributed::PipelineTopology;
use crate::error::Result;
use crate::models::shared_embeddings::{SharedEmbeddingModule, WordEmbeddingsForHead};
use crate::nn::{Module, Parameter, StateDict, VocabParallelEmbedding};
use crate::precision::{float16_to_fp32, fp32_to_float16, Precision};
use crate::tree::ValueTree;
use tracing::debug;

/// Runs a module in reduced precision while its callers keep speaking `f32`.
///
/// On construction the inner module's floating-point parameters are cast to
/// `f16` or `bf16`. During `forward`, inputs entering the first pipeline stage
/// are converted down and outputs leaving the last stage are converted back
/// up; stages in between exchange reduced-precision trees unchanged.
///
/// The wrapper is transparent to checkpoints: state-dict calls go straight to
/// the inner module, with no extra key prefix.
#[derive(Debug)]
pub struct Float16Module<M: Module> {
    module: M,
    precision: Precision,
}

impl<M: Module> Float16Module<M> {
    /// Wraps `module`, casting it to the precision selected by `args`.
    ///
    /// # Errors
    ///
    /// `Error::Config` unless exactly one of `args.fp16` and `args.bf16` is set.
    pub fn new(mut module: M, args: &TrainingArgs) -> Result<Self> {
        let precision = Precision::from_flags(args.fp16, args.bf16)?;
        match precision {
            Precision::Half => module.half(),
            Precision::BFloat16 => module.bfloat16(),
        }
        debug!(%precision, "wrapped module for reduced precision");
        Ok(Self { module, precision })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn into_inner(self) -> M {
        self.module
    }
}

impl<M: Module> Module for Float16Module<M> {
    fn forward(&self, inputs: ValueTree, topology: &PipelineTopology) -> Result<ValueTree> {
        let inputs = if topology.is_first_stage(false) {
            fp32_to_float16(inputs, self.precision)?
        } else {
            inputs
        };
        let outputs = self.module.forward(inputs, topology)?;
        if topology.is_last_stage(false) {
            float16_to_fp32(outputs)
        } else {
            Ok(outputs)
        }
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.module.named_parameters()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.module.named_parameters_mut()
    }

    fn state_dict(&self, prefix: &str) -> StateDict {
        self.module.state_dict(prefix)
    }

    fn state_dict_for_save_checkpoint(&self, prefix: &str) -> StateDict {
        self.module.state_dict_for_save_checkpoint(prefix)
    }

    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<()> {
        self.module.load_state_dict(state, strict)
    }
}

impl<M: Module + SharedEmbeddingModule> SharedEmbeddingModule for Float16Module<M> {
    fn share_word_embeddings(&self) -> bool {
        self.module.share_word_embeddings()
    }

    fn input_word_embeddings(&self) -> Option<&VocabParallelEmbedding> {
        self.module.input_word_embeddings()
    }

    fn input_word_embeddings_mut(&mut self) -> Option<&mut VocabParallelEmbedding> {
        self.module.input_word_embeddings_mut()
    }

    fn word_embeddings_for_head(&self) -> &WordEmbeddingsForHead {
        self.module.word_embeddings_for_head()
    }

    fn word_embeddings_for_head_mut(&mut self) -> &mut WordEmbeddingsForHead {
        self.module.word_embeddings_for_head_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tensor::{DType, DynTensor, Tensor};

    #[derive(Debug)]
    struct Scale {
        w: Parameter,
    }

    impl Scale {
        fn new() -> Self {
            Self {
                w: Parameter::new(Tensor::<f32>::full(&[2], 2.0)),
            }
        }
    }

    impl Module for Scale {
        fn forward(&self, inputs: ValueTree, _: &PipelineTopology) -> Result<ValueTree> {
            Ok(inputs)
        }

        fn named_parameters(&self) -> Vec<(String, &Parameter)> {
            vec![("w".into(), &self.w)]
        }

        fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
            vec![("w".into(), &mut self.w)]
        }
    }

    fn bf16_args() -> TrainingArgs {
        TrainingArgs {
            bf16: true,
            ..TrainingArgs::default()
        }
    }

    #[test]
    fn test_construction_casts_inner_parameters() {
        let m = Float16Module::new(Scale::new(), &bf16_args()).unwrap();
        assert_eq!(m.precision(), Precision::BFloat16);
        assert_eq!(m.module().w.dtype(), DType::BF16);
    }

    #[test]
    fn test_construction_requires_a_reduced_precision() {
        let err = Float16Module::new(Scale::new(), &TrainingArgs::default()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("should not be here")));
    }

    #[test]
    fn test_middle_stage_passes_reduced_tensors_through() {
        let m = Float16Module::new(Scale::new(), &bf16_args()).unwrap();
        let middle = PipelineTopology::new(1, 3).unwrap();
        let input = ValueTree::from(DynTensor::BF16(Tensor::full(&[2], half::bf16::ONE)));
        let out = m.forward(input, &middle).unwrap();
        assert_eq!(out.as_tensor().unwrap().dtype(), DType::BF16);

        // f32 inputs reaching a middle stage are not converted either.
        let out = m.forward(ValueTree::from(1.0f32), &middle).unwrap();
        assert_eq!(out.as_tensor().unwrap().dtype(), DType::F32);
    }

    #[test]
    fn test_first_stage_converts_only_inputs() {
        let m = Float16Module::new(Scale::new(), &bf16_args()).unwrap();
        let first = PipelineTopology::new(0, 2).unwrap();
        let out = m.forward(ValueTree::from(1.0f32), &first).unwrap();
        assert_eq!(out.as_tensor().unwrap().dtype(), DType::BF16);
    }

    #[test]
    fn test_state_dict_is_delegated_without_prefix() {
        let m = Float16Module::new(Scale::new(), &bf16_args()).unwrap();
        let sd = m.state_dict_for_save_checkpoint("");
        assert_eq!(sd.keys().collect::<Vec<_>>(), vec!["w"]);
        assert_eq!(sd["w"].dtype(), DType::BF16);
    }
}
