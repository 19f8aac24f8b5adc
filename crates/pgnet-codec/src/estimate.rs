//! Error estimation against a conventional single-level quantizer.
//!
//! `uniform_quantize` reproduces the TF.js converter's affine weight
//! quantization (zero point nudged onto the integer grid when the range
//! straddles zero) so its RMSE can be compared with progressive decoding
//! at a similar byte budget.

use crate::error::CodecError;
use crate::interface::BitWidthInterface;
use crate::quantize::{encode, LevelAccumulator};
use crate::Result;

/// Bit widths the uniform quantizer accepts.
pub const UNIFORM_BITS: [u32; 3] = [4, 8, 16];

#[derive(Debug, Clone, PartialEq)]
pub struct UniformQuantized {
    pub codes: Vec<u32>,
    pub scale: f64,
    pub min: f64,
    pub bits: u32,
}

impl UniformQuantized {
    pub fn dequantize(&self) -> Vec<f32> {
        uniform_dequantize(&self.codes, self.scale, self.min)
    }
}

/// Quantize to `bits` bits with a single affine range.
///
/// A constant tensor maps to all-zero codes with `scale = 1`.
pub fn uniform_quantize(data: &[f32], bits: u32) -> Result<UniformQuantized> {
    if !UNIFORM_BITS.contains(&bits) {
        return Err(CodecError::InvalidBitWidth(bits));
    }
    if data.is_empty() {
        return Ok(UniformQuantized { codes: Vec::new(), scale: 1.0, min: 0.0, bits });
    }

    let (lo, hi) = data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    let (lo, hi) = (lo as f64, hi as f64);

    if lo == hi {
        return Ok(UniformQuantized {
            codes: vec![0; data.len()],
            scale: 1.0,
            min: lo,
            bits,
        });
    }

    let (scale, min, max) = quantization_range(lo, hi, bits);
    let codes = data
        .iter()
        .map(|&v| ((v as f64).clamp(min, max) - min) / scale)
        .map(|q| q.round() as u32)
        .collect();

    Ok(UniformQuantized { codes, scale, min, bits })
}

/// Scale plus the nudged `[min, max]` range for `bits`.
fn quantization_range(lo: f64, hi: f64, bits: u32) -> (f64, f64, f64) {
    let quant_max = ((1u64 << bits) - 1) as f64;
    let scale = (hi - lo) / quant_max;

    if lo <= 0.0 && 0.0 <= hi {
        let zero_point = ((0.0 - lo) / scale).floor();
        let min = -zero_point * scale;
        (scale, min, quant_max * scale + min)
    } else {
        (scale, lo, hi)
    }
}

pub fn uniform_dequantize(codes: &[u32], scale: f64, min: f64) -> Vec<f32> {
    codes.iter().map(|&c| (c as f64 * scale + min) as f32).collect()
}

/// Root-mean-square error between two equal-length slices.
pub fn rmse(reference: &[f32], approx: &[f32]) -> Result<f64> {
    let mut acc = ErrorAccumulator::default();
    acc.add(reference, approx)?;
    Ok(acc.rmse())
}

/// Squared-error sum across many tensors, for a model-wide RMSE.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorAccumulator {
    sum_sq: f64,
    count: usize,
}

impl ErrorAccumulator {
    pub fn add(&mut self, reference: &[f32], approx: &[f32]) -> Result<()> {
        if reference.len() != approx.len() {
            return Err(CodecError::LengthMismatch {
                a: reference.len(),
                b: approx.len(),
            });
        }
        self.sum_sq += reference
            .iter()
            .zip(approx)
            .map(|(&r, &a)| (r as f64 - a as f64).powi(2))
            .sum::<f64>();
        self.count += reference.len();
        Ok(())
    }

    pub fn merge(&mut self, other: &ErrorAccumulator) {
        self.sum_sq += other.sum_sq;
        self.count += other.count;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Zero when nothing was added.
    pub fn rmse(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq / self.count as f64).sqrt()
    }
}

/// Per-level error accumulators for progressive encoding of `data`.
///
/// Entry `j` holds the squared error after decoding levels `0..=j`.
pub fn progressive_errors(data: &[f32], interface: &BitWidthInterface) -> Result<Vec<ErrorAccumulator>> {
    let encoded = encode(data, interface)?;
    let mut levels = LevelAccumulator::new(interface.clone(), encoded.params, data.len())?;
    let mut errors = Vec::with_capacity(interface.len());
    for buffer in &encoded.buffers {
        levels.push_level(buffer)?;
        let mut acc = ErrorAccumulator::default();
        acc.add(data, &levels.values()?)?;
        errors.push(acc);
    }
    Ok(errors)
}

/// RMSE after each progressive level.
pub fn progressive_rmse(data: &[f32], interface: &BitWidthInterface) -> Result<Vec<f64>> {
    Ok(progressive_errors(data, interface)?
        .iter()
        .map(ErrorAccumulator::rmse)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nudged_zero_point() {
        // range [-1, 2] at 4 bits: scale 0.2, zero point 5 lands on the grid
        let q = uniform_quantize(&[-1.0, 0.0, 2.0], 4).unwrap();
        assert!((q.scale - 0.2).abs() < 1e-7);
        assert!((q.min + 1.0).abs() < 1e-6);
        assert_eq!(q.codes, vec![0, 5, 15]);
        let back = q.dequantize();
        assert!(back[1].abs() < 1e-6);
    }

    #[test]
    fn test_positive_range_not_nudged() {
        let q = uniform_quantize(&[1.0, 2.0, 3.0], 8).unwrap();
        assert_eq!(q.min, 1.0);
        assert_eq!(q.codes[0], 0);
        assert_eq!(q.codes[2], 255);
    }

    #[test]
    fn test_constant_tensor() {
        let q = uniform_quantize(&[0.7; 4], 8).unwrap();
        assert_eq!(q.codes, vec![0; 4]);
        assert_eq!(q.scale, 1.0);
        assert_eq!(q.dequantize(), vec![0.7; 4]);
    }

    #[test]
    fn test_rejects_unsupported_bits() {
        assert_eq!(uniform_quantize(&[1.0], 3), Err(CodecError::InvalidBitWidth(3)));
    }

    #[test]
    fn test_rmse() {
        let r = rmse(&[0.0, 0.0, 0.0, 0.0], &[1.0, -1.0, 1.0, -1.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert!(rmse(&[0.0], &[]).is_err());
        assert_eq!(ErrorAccumulator::default().rmse(), 0.0);
    }

    #[test]
    fn test_progressive_rmse_decreases() {
        let data: Vec<f32> = (0..200).map(|i| ((i as f32) * 0.37).sin() * 3.0).collect();
        let iface = BitWidthInterface::new(vec![2, 2, 4, 8]).unwrap();
        let errors = progressive_rmse(&data, &iface).unwrap();
        assert_eq!(errors.len(), 4);
        for pair in errors.windows(2) {
            assert!(pair[1] < pair[0], "{errors:?}");
        }

        // 8 progressive bits land in the same ballpark as 8-bit uniform
        let uniform = uniform_quantize(&data, 8).unwrap();
        let u = rmse(&data, &uniform.dequantize()).unwrap();
        assert!(errors[2] < u * 4.0);
    }
}
