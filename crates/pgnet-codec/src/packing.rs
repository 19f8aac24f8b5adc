//! Packing utilities for fixed-width unsigned codes.
//!
//! Values are laid out most-significant-bit first and run contiguously
//! across element and byte boundaries, so `n` values of `b` bits occupy
//! exactly `ceil(n * b / 8)` bytes.

use crate::error::CodecError;
use crate::Result;

/// Widest code a single level can carry.
pub const MAX_BIT_WIDTH: u32 = 32;

/// Bytes needed to pack `count` values of `bits` bits each, or `None`
/// when the bit count overflows `usize`.
pub fn checked_packed_len(count: usize, bits: u32) -> Option<usize> {
    Some(count.checked_mul(bits as usize)?.div_ceil(8))
}

/// Like [`checked_packed_len`], saturating at `usize::MAX`.
pub fn packed_len(count: usize, bits: u32) -> usize {
    checked_packed_len(count, bits).unwrap_or(usize::MAX)
}

fn check_width(bits: u32) -> Result<()> {
    if bits == 0 || bits > MAX_BIT_WIDTH {
        return Err(CodecError::InvalidBitWidth(bits));
    }
    Ok(())
}

fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// Pack `values` into bytes using `bits` bits per value.
///
/// Every value must be `< 2^bits`. The trailing byte is zero-padded.
pub fn pack(bits: u32, values: &[u32]) -> Result<Vec<u8>> {
    check_width(bits)?;
    let limit = mask(bits);

    let mut packed = Vec::with_capacity(packed_len(values.len(), bits));
    // Holds fewer than 8 pending bits between values, so a 32-bit push fits.
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for (index, &value) in values.iter().enumerate() {
        if value as u64 > limit {
            return Err(CodecError::ValueOutOfRange { index, value, bits });
        }
        acc = (acc << bits) | value as u64;
        acc_bits += bits;
        while acc_bits >= 8 {
            acc_bits -= 8;
            packed.push((acc >> acc_bits) as u8);
        }
        acc &= if acc_bits == 0 { 0 } else { mask(acc_bits) };
    }

    if acc_bits > 0 {
        packed.push((acc << (8 - acc_bits)) as u8);
    }

    Ok(packed)
}

/// Unpack every whole value in `packed`: `floor(len * 8 / bits)` values.
pub fn unpack(bits: u32, packed: &[u8]) -> Result<Vec<u32>> {
    check_width(bits)?;
    let count = packed.len() * 8 / bits as usize;
    let value_mask = mask(bits);

    let mut values = Vec::with_capacity(count);
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for &byte in packed {
        acc = (acc << 8) | byte as u64;
        acc_bits += 8;
        while acc_bits >= bits {
            acc_bits -= bits;
            values.push(((acc >> acc_bits) & value_mask) as u32);
        }
        acc &= if acc_bits == 0 { 0 } else { mask(acc_bits) };
    }

    debug_assert_eq!(values.len(), count);
    Ok(values)
}
