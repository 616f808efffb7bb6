use super::{DType, Result, Tensor, TensorError};
use half::{bf16, f16};

/// A tensor whose element type is chosen at runtime.
///
/// Booleans are stored as `u8` (`0` / `1`).
#[derive(Debug, Clone, PartialEq)]
pub enum DynTensor {
    F32(Tensor<f32>),
    F16(Tensor<f16>),
    BF16(Tensor<bf16>),
    I64(Tensor<i64>),
    Bool(Tensor<u8>),
}

impl DynTensor {
    /// Allocates a zero-filled tensor of the given dtype.
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        match dtype {
            DType::F32 => DynTensor::F32(Tensor::zeros(shape)),
            DType::F16 => DynTensor::F16(Tensor::zeros(shape)),
            DType::BF16 => DynTensor::BF16(Tensor::zeros(shape)),
            DType::I64 => DynTensor::I64(Tensor::zeros(shape)),
            DType::Bool => DynTensor::Bool(Tensor::zeros(shape)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            DynTensor::F32(_) => DType::F32,
            DynTensor::F16(_) => DType::F16,
            DynTensor::BF16(_) => DType::BF16,
            DynTensor::I64(_) => DType::I64,
            DynTensor::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            DynTensor::F32(t) => t.shape(),
            DynTensor::F16(t) => t.shape(),
            DynTensor::BF16(t) => t.shape(),
            DynTensor::I64(t) => t.shape(),
            DynTensor::Bool(t) => t.shape(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Sets every element to zero, keeping dtype and shape.
    pub fn zero_(&mut self) {
        match self {
            DynTensor::F32(t) => t.fill(0.0),
            DynTensor::F16(t) => t.fill(f16::ZERO),
            DynTensor::BF16(t) => t.fill(bf16::ZERO),
            DynTensor::I64(t) => t.fill(0),
            DynTensor::Bool(t) => t.fill(0),
        }
    }

    /// Returns a full-precision copy of this tensor.
    pub fn to_f32(&self) -> Tensor<f32> {
        match self {
            DynTensor::F32(t) => t.clone(),
            DynTensor::F16(t) => t.map(|v| v.to_f32()),
            DynTensor::BF16(t) => t.map(|v| v.to_f32()),
            DynTensor::I64(t) => t.map(|v| v as f32),
            DynTensor::Bool(t) => t.map(f32::from),
        }
    }

    /// Builds a tensor of `dtype` from full-precision values.
    pub fn from_f32(t: Tensor<f32>, dtype: DType) -> Self {
        match dtype {
            DType::F32 => DynTensor::F32(t),
            DType::F16 => DynTensor::F16(t.map(f16::from_f32)),
            DType::BF16 => DynTensor::BF16(t.map(bf16::from_f32)),
            DType::I64 => DynTensor::I64(t.map(|v| v as i64)),
            DType::Bool => DynTensor::Bool(t.map(|v| u8::from(v != 0.0))),
        }
    }

    /// Returns a copy converted to `dtype`.
    ///
    /// Always allocates: the result never shares storage with `self`, so the
    /// caller's tensor keeps its original precision. Integer targets truncate
    /// toward zero; boolean targets map non-zero to `1`.
    pub fn to_dtype(&self, dtype: DType) -> DynTensor {
        if self.dtype() == dtype {
            return self.clone();
        }
        match (self, dtype) {
            (DynTensor::F32(t), DType::F16) => DynTensor::F16(t.map(f16::from_f32)),
            (DynTensor::F32(t), DType::BF16) => DynTensor::BF16(t.map(bf16::from_f32)),
            (DynTensor::I64(t), DType::Bool) => DynTensor::Bool(t.map(|v| u8::from(v != 0))),
            (DynTensor::Bool(t), DType::I64) => DynTensor::I64(t.map(i64::from)),
            _ => DynTensor::from_f32(self.to_f32(), dtype),
        }
    }

    pub fn as_f32(&self) -> Result<&Tensor<f32>> {
        match self {
            DynTensor::F32(t) => Ok(t),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    pub fn as_i64(&self) -> Result<&Tensor<i64>> {
        match self {
            DynTensor::I64(t) => Ok(t),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::I64,
                got: other.dtype(),
            }),
        }
    }
}

impl From<Tensor<f32>> for DynTensor {
    fn from(t: Tensor<f32>) -> Self {
        DynTensor::F32(t)
    }
}

impl From<Tensor<f16>> for DynTensor {
    fn from(t: Tensor<f16>) -> Self {
        DynTensor::F16(t)
    }
}

impl From<Tensor<bf16>> for DynTensor {
    fn from(t: Tensor<bf16>) -> Self {
        DynTensor::BF16(t)
    }
}

impl From<Tensor<i64>> for DynTensor {
    fn from(t: Tensor<i64>) -> Self {
        DynTensor::I64(t)
    }
}
