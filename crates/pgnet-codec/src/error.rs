/// Errors from packing, encoding and decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("bit width {0} outside supported range 1..=32")]
    InvalidBitWidth(u32),

    #[error("invalid bit-width interface: {0}")]
    InvalidInterface(String),

    #[error("value {value} at index {index} does not fit in {bits} bits")]
    ValueOutOfRange { index: usize, value: u32, bits: u32 },

    #[error("non-finite value {value} at index {index}")]
    NonFinite { index: usize, value: f32 },

    #[error("degenerate quantization range: scale={scale}, min={min}")]
    DegenerateRange { scale: f64, min: f64 },

    #[error("at least one level is required to decode")]
    NoLevels,

    #[error("{supplied} levels supplied but the interface only has {levels}")]
    TooManyLevels { supplied: usize, levels: usize },

    #[error("level {level} holds {got} values, expected at least {expected}")]
    ShortBuffer {
        level: usize,
        expected: usize,
        got: usize,
    },

    #[error("length mismatch: {a} vs {b}")]
    LengthMismatch { a: usize, b: usize },
}
