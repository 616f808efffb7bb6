//! # stagewise-kernels
//!
//! Plain CPU kernels over row-major slices. They know nothing about tensors,
//! dtypes or devices: callers hand in flat data plus the matrix dimensions and
//! get a freshly allocated `Vec` back.
//!
//! Keeping them in their own crate lets `stagewise` swap in a BLAS-backed
//! implementation later without touching the tensor runtime.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_matmul;
pub mod cpu_transpose;

pub use cpu_matmul::{cpu_matmul, cpu_matmul_transposed, MatmulDims};
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    /// A buffer length does not agree with the dimensions it was passed with.
    #[error("Buffer length mismatch for {operand}: expected {expected} elements, got {got}")]
    LengthMismatch {
        operand: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the core crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
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

pub(crate) fn check_len(operand: &'static str, data_len: usize, expected: usize) -> Result<()> {
    if data_len != expected {
        return Err(KernelError::LengthMismatch {
            operand,
            expected,
            got: data_len,
        });
    }
    Ok(())
}
