use std::fmt;

/// Element type of a [`DynTensor`](super::DynTensor).
///
/// `F32` is "full precision"; `F16` and `BF16` are the two reduced-precision
/// formats a pipeline can run in. Integer and boolean tensors (token ids,
/// masks) never take part in precision conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    BF16,
    I64,
    Bool,
}

impl DType {
    pub const fn is_floating_point(self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    /// `true` for the 16-bit floating formats.
    pub const fn is_reduced_precision(self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I64 => 8,
            DType::Bool => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::I64 => "int64",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
