//! Checkpointing and Serialization.
//!
//! State dicts are stored in the `safetensors` format. Every tensor keeps its
//! dtype and shape on disk, so a bf16 model reloads as bf16 and the last
//! stage's `word_embeddings_for_head.weight` round-trips like any other key.

use crate::error::{Error, Result};
use crate::nn::{Module, StateDict};
use crate::tensor::{DType, DynTensor, Tensor};
use half::{bf16, f16};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::path::Path;
use tracing::debug;

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::I64 => Dtype::I64,
        DType::Bool => Dtype::BOOL,
    }
}

/// Little-endian bytes of a tensor's elements.
fn encode(tensor: &DynTensor) -> Vec<u8> {
    match tensor {
        DynTensor::F32(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        DynTensor::F16(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        DynTensor::BF16(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        DynTensor::I64(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        DynTensor::Bool(t) => t.data().to_vec(),
    }
}

fn decode(name: &str, view: &TensorView<'_>) -> Result<DynTensor> {
    let shape = view.shape();
    let bytes = view.data();
    let tensor = match view.dtype() {
        Dtype::F32 => DynTensor::F32(Tensor::new(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            shape,
        )?),
        Dtype::F16 => DynTensor::F16(Tensor::new(
            bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]))
                .collect(),
            shape,
        )?),
        Dtype::BF16 => DynTensor::BF16(Tensor::new(
            bytes
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]))
                .collect(),
            shape,
        )?),
        Dtype::I64 => DynTensor::I64(Tensor::new(
            bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
            shape,
        )?),
        Dtype::BOOL => DynTensor::Bool(Tensor::new(bytes.to_vec(), shape)?),
        other => {
            return Err(Error::Checkpoint(format!(
                "tensor '{name}' has unsupported dtype {other:?}"
            )))
        }
    };
    Ok(tensor)
}

/// Saves a state dict to a safetensors file.
pub fn save_checkpoint<P: AsRef<Path>>(path: P, state: &StateDict) -> Result<()> {
    let encoded: Vec<(&String, &DynTensor, Vec<u8>)> = state
        .iter()
        .map(|(name, tensor)| (name, tensor, encode(tensor)))
        .collect();

    let mut views = Vec::with_capacity(encoded.len());
    for (name, tensor, bytes) in &encoded {
        let view = TensorView::new(
            to_safetensors_dtype(tensor.dtype()),
            tensor.shape().to_vec(),
            bytes,
        )
        .map_err(|e| Error::Checkpoint(format!("tensor '{name}': {e:?}")))?;
        views.push((name.as_str(), view));
    }

    safetensors::serialize_to_file(views, None, path.as_ref())
        .map_err(|e| Error::Checkpoint(format!("failed to save checkpoint: {e:?}")))?;
    debug!(path = %path.as_ref().display(), tensors = state.len(), "saved checkpoint");
    Ok(())
}

/// Loads a state dict from a safetensors file.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<StateDict> {
    let file_content = std::fs::read(path.as_ref())?;
    let safetensors = SafeTensors::deserialize(&file_content)
        .map_err(|e| Error::Checkpoint(format!("failed to deserialize safetensors: {e:?}")))?;

    let mut state = StateDict::new();
    for (name, view) in safetensors.tensors() {
        let tensor = decode(&name, &view)?;
        state.insert(name, tensor);
    }
    debug!(path = %path.as_ref().display(), tensors = state.len(), "loaded checkpoint");
    Ok(state)
}

/// Writes `module.state_dict_for_save_checkpoint("")` to `path`.
pub fn save_module<M: Module + ?Sized, P: AsRef<Path>>(path: P, module: &M) -> Result<()> {
    save_checkpoint(path, &module.state_dict_for_save_checkpoint(""))
}

/// Reads `path` and loads it into `module`.
pub fn load_module<M: Module + ?Sized, P: AsRef<Path>>(path: P, module: &mut M, strict: bool) -> Result<()> {
    let state = load_checkpoint(path)?;
    module.load_state_dict(&state, strict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let t = DynTensor::F32(Tensor::scalar(1.0f32));
        assert_eq!(encode(&t), 1.0f32.to_le_bytes().to_vec());
        let t = DynTensor::I64(Tensor::new(vec![1, -1], &[2]).unwrap());
        assert_eq!(encode(&t).len(), 16);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_checkpoint("/nonexistent/stagewise.safetensors").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_garbage_file_is_checkpoint_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a checkpoint").unwrap();
        let err = load_checkpoint(file.path()).unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
    }
}
