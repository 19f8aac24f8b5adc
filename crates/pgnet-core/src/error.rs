use crate::DType;

/// Errors raised by tensor construction and kernels.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("shape {shape:?} requires {expected} elements, got {got}")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("shape {shape:?} has more elements than fit in memory")]
    ShapeOverflow { shape: Vec<usize> },

    #[error("byte length {len} is not a multiple of {dtype} element size")]
    ByteLength { dtype: DType, len: usize },

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("matmul dimension mismatch: [{m}, {k1}] @ [{k2}, {n}]")]
    MatmulDimMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    #[error("operation '{op}' does not support dtype {dtype}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("cannot reshape {from:?} into {to:?}")]
    InvalidReshape { from: Vec<usize>, to: Vec<isize> },
}
