use std::fmt;

use serde::{Deserialize, Serialize};

/// Element types a progressive model can carry.
///
/// Float tensors are quantized for transmission; integer tensors travel
/// verbatim in the first partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE 754 single-precision float
    #[serde(rename = "float32")]
    F32,
    /// 32-bit signed integer
    #[serde(rename = "int32")]
    I32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.checked_storage_bytes(n).unwrap_or(usize::MAX)
    }

    /// [`storage_bytes`](Self::storage_bytes), or `None` on overflow.
    pub fn checked_storage_bytes(&self, n: usize) -> Option<usize> {
        n.checked_mul(self.element_size())
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32)
    }

    /// Wire-format tag (`float32` / `int32`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::I32 => "int32",
        }
    }

    /// Parse a wire-format tag. Returns `None` for anything else
    /// (`bool`, `complex64`, `string`, ...).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "float32" => Some(DType::F32),
            "int32" => Some(DType::I32),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
