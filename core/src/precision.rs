//! Precision conversion at pipeline boundaries.
//!
//! Reduced-precision training keeps the model's weights and activations in a
//! 16-bit format, but the rest of the program (data loading, loss reporting)
//! speaks `f32`. The helpers here translate a whole [`ValueTree`] across that
//! boundary:
//!
//! - [`fp32_to_float16`] on the way *into* the first stage: every `F32` leaf
//!   becomes `F16` or `BF16`; everything else is left alone.
//! - [`float16_to_fp32`] on the way *out of* the last stage: every `F16`/`BF16`
//!   leaf becomes `F32`; everything else is left alone.
//!
//! Integer tensors (token ids) and booleans (masks) are never touched.

use crate::error::{Error, Result};
use crate::tensor::{DType, DynTensor};
use crate::tree::ValueTree;
use std::fmt;

/// The reduced-precision format a wrapped module runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// IEEE 754 half precision (`f16`).
    Half,
    /// Brain floating point (`bf16`): `f32` exponent range, 8-bit mantissa.
    BFloat16,
}

impl Precision {
    /// Resolves the `fp16` / `bf16` flags into a single selection.
    ///
    /// # Errors
    ///
    /// `Error::Config` if neither or both flags are set. Callers only reach
    /// this when they asked for reduced precision, so an empty selection is a
    /// bug upstream rather than a request for `f32`.
    pub fn from_flags(fp16: bool, bf16: bool) -> Result<Self> {
        match (fp16, bf16) {
            (true, false) => Ok(Precision::Half),
            (false, true) => Ok(Precision::BFloat16),
            (false, false) => Err(Error::config(
                "should not be here: reduced precision requested without fp16 or bf16",
            )),
            (true, true) => Err(Error::config(
                "should not be here: fp16 and bf16 are mutually exclusive",
            )),
        }
    }

    pub const fn dtype(self) -> DType {
        match self {
            Precision::Half => DType::F16,
            Precision::BFloat16 => DType::BF16,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dtype().name())
    }
}

/// Converts every full-precision leaf of `val` to `precision`.
pub fn fp32_to_float16(val: ValueTree, precision: Precision) -> Result<ValueTree> {
    let target = precision.dtype();
    val.map_tensors(&mut |t: DynTensor| {
        Ok(if t.dtype() == DType::F32 {
            t.to_dtype(target)
        } else {
            t
        })
    })
}

/// Converts every `F16`/`BF16` leaf of `val` back to `F32`.
pub fn float16_to_fp32(val: ValueTree) -> Result<ValueTree> {
    val.map_tensors(&mut |t: DynTensor| {
        Ok(if t.dtype().is_reduced_precision() {
            t.to_dtype(DType::F32)
        } else {
            t
        })
    })
}
