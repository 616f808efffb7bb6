//! Core Tensor implementation.
//!
//! # What is a Tensor here?
//!
//! A **Tensor** is a dense, row-major, N-dimensional array living in host memory.
//! `stagewise` only needs enough tensor machinery to move weights and
//! activations between pipeline stages, change their precision, and run the
//! handful of kernels the demo model uses. Everything heavier belongs to a real
//! deep-learning runtime.
//!
//! Two layers:
//!
//! 1. [`Tensor<T>`]: statically typed storage (`f32`, `half::f16`, `half::bf16`,
//!    `i64`, `u8`) with a shape known only at runtime.
//! 2. [`DynTensor`]: a tagged union over those element types, carrying a
//!    [`DType`]. This is the leaf type of every [`ValueTree`](crate::tree::ValueTree)
//!    and of every [`Parameter`](crate::nn::Parameter), so precision can change
//!    at runtime without generic plumbing.
//!
//! ```rust
//! use stagewise::tensor::{DType, DynTensor, Tensor};
//!
//! let t = Tensor::<f32>::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! assert_eq!(t.shape(), &[2, 2]);
//!
//! let half = DynTensor::from(t).to_dtype(DType::F16);
//! assert_eq!(half.dtype(), DType::F16);
//! ```
//!
//! > **Shape at runtime.** A `const RANK` generic does not work for tree
//! > leaves, whose rank is only known when a caller builds the tree (a loss
//! > scalar next to a `[batch, seq, hidden]` activation). Shapes are therefore
//! > plain `Vec<usize>` and every constructor validates them.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use rayon::prelude::*;
use std::fmt::Debug;
use thiserror::Error;

pub mod dtype;
pub mod dyn_tensor;

pub use dtype::DType;
pub use dyn_tensor::DynTensor;

/// Error type for Tensor operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<i64>, shape: Vec<usize> },
    /// A tensor had a different element type than the operation requires.
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },
    /// The requested operation is not supported (e.g., for a specific dtype).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// - `Copy + Clone`: elements live in a contiguous `Vec<T>`.
/// - `Num + NumAssign`: in-place reductions (`+=`) for collectives and updates.
/// - `Send + Sync`: element loops run on `rayon`.
///
/// `half::f16` and `half::bf16` satisfy this through the `num-traits` feature of `half`.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// A dense row-major tensor with a runtime shape.
///
/// A rank-0 tensor (empty shape) holds exactly one element.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: TensorElem> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: TensorElem> Tensor<T> {
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Creates a rank-0 tensor holding `value`.
    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Creates a tensor filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; size],
        }
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a tensor filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, T::one())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Overwrites every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.par_iter_mut().for_each(|x| *x = value);
    }

    /// Returns a tensor with the same data viewed under a new shape.
    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if size != self.data.len() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape,
                got: shape.to_vec(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data: self.data,
        })
    }

    /// Applies `f` element-wise, producing a new tensor of possibly different element type.
    ///
    /// The source is left untouched, so converting a caller's tensor never aliases it.
    pub fn map<U, F>(&self, f: F) -> Tensor<U>
    where
        U: TensorElem,
        F: Fn(T) -> U + Send + Sync,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.par_iter().map(|&x| f(x)).collect(),
        }
    }
}
