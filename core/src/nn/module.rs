use crate::distributed::PipelineTopology;
use crate::error::{Error, Result};
use crate::nn::Parameter;
use crate::tensor::{DType, DynTensor, TensorError};
use crate::tree::ValueTree;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Named tensors keyed by dotted parameter path, e.g. `"embedding.word_embeddings.weight"`.
///
/// A `BTreeMap` keeps iteration (and therefore checkpoint layout) deterministic.
pub type StateDict = BTreeMap<String, DynTensor>;

/// The interface every layer, model and wrapper implements.
///
/// A module is one pipeline stage's slice of a network: `forward` receives the
/// tree produced by the previous stage (or the caller's input on the first
/// stage) plus the stage's [`PipelineTopology`], so layers that behave
/// differently at the ends of the pipeline can ask where they run.
///
/// Only [`forward`](Module::forward) and the two parameter listings are
/// required. State-dict handling and dtype casts are derived from the
/// parameter listing, which must name parameters with stable dotted paths.
pub trait Module: Debug + Send + Sync {
    fn forward(&self, inputs: ValueTree, topology: &PipelineTopology) -> Result<ValueTree>;

    /// Parameters in a fixed order, keyed by dotted path relative to this module.
    fn named_parameters(&self) -> Vec<(String, &Parameter)>;

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.named_parameters_mut()
            .into_iter()
            .map(|(_, p)| p)
            .collect()
    }

    /// Snapshot of every parameter, keys prefixed with `prefix`.
    fn state_dict(&self, prefix: &str) -> StateDict {
        self.named_parameters()
            .into_iter()
            .map(|(name, p)| (format!("{prefix}{name}"), p.data().clone()))
            .collect()
    }

    /// The snapshot written to checkpoints. Same as [`state_dict`](Module::state_dict)
    /// unless a module needs to add or hide entries.
    fn state_dict_for_save_checkpoint(&self, prefix: &str) -> StateDict {
        self.state_dict(prefix)
    }

    /// Copies values from `state` into matching parameters.
    ///
    /// Values are cast to each parameter's current dtype. With `strict`, any
    /// missing or unexpected key fails the load before a parameter is touched.
    /// A shape mismatch always fails, also before anything is written.
    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<()> {
        let mut params = self.named_parameters_mut();

        let names: BTreeSet<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !state.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        let unexpected: Vec<String> = state
            .keys()
            .filter(|k| !names.contains(k.as_str()))
            .cloned()
            .collect();
        if strict && (!missing.is_empty() || !unexpected.is_empty()) {
            return Err(Error::StateDict {
                missing,
                unexpected,
            });
        }

        for (name, param) in params.iter() {
            if let Some(value) = state.get(name) {
                if value.shape() != param.shape() {
                    return Err(TensorError::ShapeMismatch {
                        expected: param.shape().to_vec(),
                        got: value.shape().to_vec(),
                    }
                    .into());
                }
            }
        }

        for (name, param) in params.iter_mut() {
            if let Some(value) = state.get(name) {
                let dtype = param.dtype();
                param.set_data(value.to_dtype(dtype));
            }
        }
        Ok(())
    }

    /// Casts every floating-point parameter to `dtype`.
    fn to_dtype(&mut self, dtype: DType) {
        for (_, p) in self.named_parameters_mut() {
            p.to_dtype(dtype);
        }
    }

    fn half(&mut self) {
        self.to_dtype(DType::F16);
    }

    fn bfloat16(&mut self) {
        self.to_dtype(DType::BF16);
    }

    fn zero_grad(&mut self) {
        for (_, p) in self.named_parameters_mut() {
            p.zero_grad();
        }
    }
}
