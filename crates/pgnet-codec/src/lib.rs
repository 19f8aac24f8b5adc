//! # pgnet-codec
//!
//! Progressive quantization: one float tensor in, an ordered stack of
//! bit-width levels out.
//!
//! - MSB-first bit packing at any width in 1..=32
//! - `BitWidthInterface`: how the 32-bit normalized code is split into levels
//! - Affine encode/decode over any contiguous prefix of levels
//! - Incremental level merging for streaming consumers
//! - TF.js-style uniform quantization for error comparisons
//!
//! ```text
//! f32 tensor → normalize (u32 codes) → split by interface → pack per level
//! level 0..=j → unpack → merge bits → dequantize (+ half-ULP) → f32 tensor
//! ```

pub mod error;
pub mod estimate;
pub mod interface;
pub mod packing;
pub mod quantize;

pub use error::CodecError;
pub use interface::BitWidthInterface;
pub use quantize::{decode, decode_exact, encode, Encoded, LevelAccumulator, QuantizationParams};

pub type Result<T> = std::result::Result<T, CodecError>;
