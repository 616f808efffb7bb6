use crate::distributed::PipelineTopology;
use crate::error::{Error, Result};
use crate::nn::{InitMethod, Module, Parameter};
use crate::tensor::{DynTensor, Tensor, TensorElem, TensorError};
use crate::tree::ValueTree;
use rayon::prelude::*;

/// Token-id to vector lookup, with the vocabulary split across tensor-parallel ranks.
///
/// Rank `r` of `tp_size` owns rows `[r * V / tp_size, (r + 1) * V / tp_size)`.
/// Ids outside the local range produce zero rows, so summing every rank's
/// output reconstructs the full lookup. With `tp_size == 1` this is a plain
/// embedding table.
#[derive(Debug, Clone)]
pub struct VocabParallelEmbedding {
    pub weight: Parameter,
    num_embeddings: usize,
    embedding_dim: usize,
    vocab_start_index: usize,
    vocab_end_index: usize,
}

impl VocabParallelEmbedding {
    /// An unpartitioned `[num_embeddings, embedding_dim]` table filled by `init_method`.
    pub fn new(num_embeddings: usize, embedding_dim: usize, init_method: &InitMethod) -> Self {
        Self::build(num_embeddings, embedding_dim, 0, num_embeddings, init_method)
    }

    /// The slice of the table owned by tensor-parallel rank `tp_rank`.
    pub fn partitioned(
        num_embeddings: usize,
        embedding_dim: usize,
        tp_rank: usize,
        tp_size: usize,
        init_method: &InitMethod,
    ) -> Result<Self> {
        if tp_size == 0 || tp_rank >= tp_size {
            return Err(Error::config(format!(
                "tensor parallel rank {tp_rank} out of range for size {tp_size}"
            )));
        }
        if num_embeddings % tp_size != 0 {
            return Err(Error::config(format!(
                "vocab size {num_embeddings} is not divisible by tensor parallel size {tp_size}"
            )));
        }
        let per_partition = num_embeddings / tp_size;
        let start = tp_rank * per_partition;
        Ok(Self::build(
            num_embeddings,
            embedding_dim,
            start,
            start + per_partition,
            init_method,
        ))
    }

    fn build(
        num_embeddings: usize,
        embedding_dim: usize,
        vocab_start_index: usize,
        vocab_end_index: usize,
        init_method: &InitMethod,
    ) -> Self {
        let mut weight =
            Tensor::<f32>::zeros(&[vocab_end_index - vocab_start_index, embedding_dim]);
        init_method(&mut weight);
        Self {
            weight: Parameter::new(weight),
            num_embeddings,
            embedding_dim,
            vocab_start_index,
            vocab_end_index,
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Local vocabulary range `[start, end)`.
    pub fn vocab_range(&self) -> (usize, usize) {
        (self.vocab_start_index, self.vocab_end_index)
    }

    /// Looks up `ids` of any shape, returning `ids.shape() + [embedding_dim]`
    /// in the weight's dtype.
    pub fn forward(&self, ids: &Tensor<i64>) -> Result<DynTensor> {
        for &id in ids.data() {
            if id < 0 || id as usize >= self.num_embeddings {
                return Err(TensorError::IndexOutOfBounds {
                    index: vec![id],
                    shape: vec![self.num_embeddings, self.embedding_dim],
                }
                .into());
            }
        }

        let mut shape = ids.shape().to_vec();
        shape.push(self.embedding_dim);
        let out = match self.weight.data() {
            DynTensor::F32(w) => DynTensor::F32(self.gather(w, ids, &shape)?),
            DynTensor::F16(w) => DynTensor::F16(self.gather(w, ids, &shape)?),
            DynTensor::BF16(w) => DynTensor::BF16(self.gather(w, ids, &shape)?),
            other => {
                return Err(TensorError::Unsupported(format!(
                    "embedding weight of dtype {}",
                    other.dtype()
                ))
                .into())
            }
        };
        Ok(out)
    }

    fn gather<T: TensorElem>(
        &self,
        weight: &Tensor<T>,
        ids: &Tensor<i64>,
        shape: &[usize],
    ) -> Result<Tensor<T>> {
        let dim = self.embedding_dim;
        let mut out = Tensor::<T>::zeros(shape);
        if dim == 0 {
            return Ok(out);
        }
        let (start, end) = self.vocab_range();
        let table = weight.data();
        out.data_mut()
            .par_chunks_mut(dim)
            .zip(ids.data().par_iter())
            .for_each(|(row, &id)| {
                let id = id as usize;
                if (start..end).contains(&id) {
                    let local = id - start;
                    row.copy_from_slice(&table[local * dim..(local + 1) * dim]);
                }
            });
        Ok(out)
    }
}

impl Module for VocabParallelEmbedding {
    /// Embeds the first tensor leaf of `inputs`, which must hold `i64` ids.
    fn forward(&self, inputs: ValueTree, _topology: &PipelineTopology) -> Result<ValueTree> {
        let ids = inputs
            .first_tensor()
            .ok_or_else(|| Error::config("embedding input has no tensor"))?
            .as_i64()?;
        Ok(ValueTree::Tensor(VocabParallelEmbedding::forward(self, ids)?))
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        vec![("weight".to_string(), &self.weight)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        vec![("weight".to_string(), &mut self.weight)]
    }
}
