//! # pgnet-core
//!
//! Minimal tensor layer for progressive model delivery.
//!
//! Provides the `Tensor` type the loader reconstructs and injects:
//! - Two dtypes, F32 and I32, matching the wire format's `float32` / `int32`
//! - Row-major CPU storage with a stack-allocated `Shape`
//! - The handful of kernels the built-in model shells execute (matmul,
//!   bias add, activations, softmax, top-k)

pub mod dtype;
pub mod error;
pub mod ops;
pub mod shape;
pub mod tensor;

use std::collections::HashMap;

pub use dtype::DType;
pub use error::CoreError;
pub use shape::Shape;
pub use tensor::{Tensor, TensorData};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Tensors keyed by weight or node name.
pub type NamedTensors = HashMap<String, Tensor>;
