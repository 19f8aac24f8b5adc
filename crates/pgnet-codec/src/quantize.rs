//! Progressive affine quantization.
//!
//! A float tensor is mapped onto the full `u32` range with a single affine
//! transform, then the 32-bit codes are sliced MSB-first into levels
//! according to a [`BitWidthInterface`]. Any prefix of levels decodes to a
//! valid approximation; each extra level tightens the error bound to
//! `scale / 2^(bits_used + 1)`.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::interface::BitWidthInterface;
use crate::packing::{pack, packed_len, unpack};
use crate::Result;

const TWO_POW_32: f64 = 4_294_967_296.0;

/// Affine descriptor: `value ≈ code / 2^32 * scale + min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub scale: f64,
    pub min: f64,
}

impl QuantizationParams {
    /// Reject ranges that cannot be dequantized.
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 || !self.min.is_finite() {
            return Err(CodecError::DegenerateRange {
                scale: self.scale,
                min: self.min,
            });
        }
        Ok(())
    }

    /// Centre of the representable range.
    pub fn midpoint(&self) -> f64 {
        self.min + self.scale * 0.5
    }

    /// Worst-case absolute error after decoding `bits_used` bits.
    pub fn error_bound(&self, bits_used: u32) -> f64 {
        self.scale / 2f64.powi(bits_used as i32 + 1)
    }

    fn dequantize(&self, code: u32, bits_used: u32) -> f32 {
        let revise = self.error_bound(bits_used);
        (code as f64 / TWO_POW_32 * self.scale + self.min + revise) as f32
    }
}

/// Output of [`encode`]: one packed buffer per level plus the affine range.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub buffers: Vec<Vec<u8>>,
    pub params: QuantizationParams,
}

impl Encoded {
    /// Byte length of each level, in level order.
    pub fn byte_sizes(&self) -> Vec<usize> {
        self.buffers.iter().map(Vec::len).collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }
}

/// Encode `data` into one packed buffer per level of `interface`.
///
/// A constant tensor encodes as all-zero codes with `scale = 1.0`.
pub fn encode(data: &[f32], interface: &BitWidthInterface) -> Result<Encoded> {
    if let Some((index, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(CodecError::NonFinite { index, value });
    }

    let (min, max) = data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });

    let (params, codes) = if data.is_empty() {
        (QuantizationParams { scale: 1.0, min: 0.0 }, Vec::new())
    } else if min == max {
        (
            QuantizationParams { scale: 1.0, min: min as f64 },
            vec![0u32; data.len()],
        )
    } else {
        let params = QuantizationParams {
            scale: max as f64 - min as f64,
            min: min as f64,
        };
        let codes = data.iter().map(|&v| normalize(v, max, &params)).collect();
        (params, codes)
    };

    let mut buffers = Vec::with_capacity(interface.len());
    let mut level_codes = vec![0u32; codes.len()];
    for (level, &bits) in interface.levels().iter().enumerate() {
        let shift = 32 - interface.bits_through(level);
        let mask = ((1u64 << bits) - 1) as u32;
        for (dst, &code) in level_codes.iter_mut().zip(&codes) {
            *dst = ((code as u64 >> shift) as u32) & mask;
        }
        buffers.push(pack(bits, &level_codes)?);
    }

    Ok(Encoded { buffers, params })
}

fn normalize(value: f32, max: f32, params: &QuantizationParams) -> u32 {
    if value == max {
        return u32::MAX;
    }
    let scaled = ((value as f64 - params.min) / params.scale * TWO_POW_32).floor();
    scaled.clamp(0.0, u32::MAX as f64) as u32
}

/// Decode a contiguous prefix of levels.
///
/// Yields as many values as the shortest supplied level unpacks to, which
/// may include trailing padding values. Use [`decode_exact`] when the
/// element count is known.
pub fn decode<B: AsRef<[u8]>>(
    buffers: &[B],
    params: &QuantizationParams,
    interface: &BitWidthInterface,
) -> Result<Vec<f32>> {
    check_prefix(buffers.len(), params, interface)?;
    let parts = buffers
        .iter()
        .enumerate()
        .map(|(level, buf)| unpack(interface.width(level), buf.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let count = parts.iter().map(Vec::len).min().unwrap_or(0);
    Ok(merge_and_dequantize(&parts, count, params, interface))
}

/// Decode a contiguous prefix of levels into exactly `numel` values.
///
/// Every level must hold at least `numel` values; padding is dropped.
pub fn decode_exact<B: AsRef<[u8]>>(
    buffers: &[B],
    params: &QuantizationParams,
    interface: &BitWidthInterface,
    numel: usize,
) -> Result<Vec<f32>> {
    check_prefix(buffers.len(), params, interface)?;
    let mut parts = Vec::with_capacity(buffers.len());
    for (level, buf) in buffers.iter().enumerate() {
        let mut values = unpack(interface.width(level), buf.as_ref())?;
        if values.len() < numel {
            return Err(CodecError::ShortBuffer {
                level,
                expected: numel,
                got: values.len(),
            });
        }
        values.truncate(numel);
        parts.push(values);
    }
    Ok(merge_and_dequantize(&parts, numel, params, interface))
}

fn check_prefix(
    supplied: usize,
    params: &QuantizationParams,
    interface: &BitWidthInterface,
) -> Result<()> {
    if supplied == 0 {
        return Err(CodecError::NoLevels);
    }
    if supplied > interface.len() {
        return Err(CodecError::TooManyLevels {
            supplied,
            levels: interface.len(),
        });
    }
    params.validate()
}

fn merge_and_dequantize(
    parts: &[Vec<u32>],
    count: usize,
    params: &QuantizationParams,
    interface: &BitWidthInterface,
) -> Vec<f32> {
    let mut codes = vec![0u32; count];
    for (level, part) in parts.iter().enumerate() {
        let shift = 32 - interface.bits_through(level);
        for (code, &p) in codes.iter_mut().zip(part) {
            *code |= p << shift;
        }
    }
    let bits_used = interface.bits_through(parts.len() - 1);
    codes.iter().map(|&c| params.dequantize(c, bits_used)).collect()
}

/// Running per-element codes for one tensor, merged one level at a time.
///
/// After `k` pushes, [`values`](Self::values) is bit-identical to
/// `decode_exact` over the same `k` buffers.
#[derive(Debug, Clone)]
pub struct LevelAccumulator {
    interface: BitWidthInterface,
    params: QuantizationParams,
    codes: Vec<u32>,
    levels: usize,
}

impl LevelAccumulator {
    pub fn new(
        interface: BitWidthInterface,
        params: QuantizationParams,
        numel: usize,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            interface,
            params,
            codes: vec![0; numel],
            levels: 0,
        })
    }

    /// Check that `bytes` can be merged as the next level without
    /// merging it. [`push_level`](Self::push_level) succeeds exactly when
    /// this does.
    pub fn check_level(&self, bytes: &[u8]) -> Result<()> {
        let level = self.levels;
        if level >= self.interface.len() {
            return Err(CodecError::TooManyLevels {
                supplied: level + 1,
                levels: self.interface.len(),
            });
        }
        let bits = self.interface.width(level);
        if bytes.len() < packed_len(self.codes.len(), bits) {
            return Err(CodecError::ShortBuffer {
                level,
                expected: self.codes.len(),
                got: bytes.len() * 8 / bits as usize,
            });
        }
        Ok(())
    }

    /// Merge the next level's packed bytes.
    pub fn push_level(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_level(bytes)?;
        let level = self.levels;
        let part = unpack(self.interface.width(level), bytes)?;
        let shift = 32 - self.interface.bits_through(level);
        for (code, &p) in self.codes.iter_mut().zip(&part) {
            *code |= p << shift;
        }
        self.levels += 1;
        Ok(())
    }

    pub fn levels_merged(&self) -> usize {
        self.levels
    }

    pub fn bits_used(&self) -> u32 {
        match self.levels {
            0 => 0,
            n => self.interface.bits_through(n - 1),
        }
    }

    /// Dequantized values at the current precision.
    pub fn values(&self) -> Result<Vec<f32>> {
        if self.levels == 0 {
            return Err(CodecError::NoLevels);
        }
        let bits_used = self.bits_used();
        Ok(self
            .codes
            .iter()
            .map(|&c| self.params.dequantize(c, bits_used))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SCENARIO: [f32; 8] = [0.1, 0.11, 0.20, 0.21, 0.30, 0.31, 0.49, 4.0];

    fn interface(widths: &[u32]) -> BitWidthInterface {
        BitWidthInterface::new(widths.to_vec()).unwrap()
    }

    /// Matches to `decimals` decimal places: `|a - b| < 0.5 * 10^-decimals`.
    fn assert_close(decoded: &[f32], expected: &[f32], decimals: i32) {
        let tol = 0.5 * 10f32.powi(-decimals);
        assert_eq!(decoded.len(), expected.len());
        for (i, (d, e)) in decoded.iter().zip(expected).enumerate() {
            assert!(
                (d - e).abs() < tol,
                "index {i}: decoded {d} vs {e} at {decimals} decimals"
            );
        }
    }

    #[test]
    fn test_scenario_4_4_8_16() {
        let iface = interface(&[4, 4, 8, 16]);
        let enc = encode(&SCENARIO, &iface).unwrap();
        assert!((enc.params.min - 0.1).abs() < 1e-6);
        assert!((enc.params.scale - 3.9).abs() < 1e-6);

        let n = SCENARIO.len();
        let level0 = decode_exact(&enc.buffers[..1], &enc.params, &iface, n).unwrap();
        assert!(level0[0] < level0[7]);

        let two = decode_exact(&enc.buffers[..2], &enc.params, &iface, n).unwrap();
        assert_close(&two, &SCENARIO, 1);
        let three = decode_exact(&enc.buffers[..3], &enc.params, &iface, n).unwrap();
        assert_close(&three, &SCENARIO, 2);
        let all = decode_exact(&enc.buffers, &enc.params, &iface, n).unwrap();
        assert_close(&all, &SCENARIO, 4);
    }

    #[test]
    fn test_scenario_5_11_16() {
        let iface = interface(&[5, 11, 16]);
        let enc = encode(&SCENARIO, &iface).unwrap();
        let n = SCENARIO.len();

        let one = decode_exact(&enc.buffers[..1], &enc.params, &iface, n).unwrap();
        assert_close(&one, &SCENARIO, 0);
        let two = decode_exact(&enc.buffers[..2], &enc.params, &iface, n).unwrap();
        assert_close(&two, &SCENARIO, 2);
        let all = decode_exact(&enc.buffers, &enc.params, &iface, n).unwrap();
        assert_close(&all, &SCENARIO, 4);
    }

    #[test]
    fn test_convergence_bound_per_level() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<f32> = (0..1000).map(|_| rng.gen_range(-5.0f32..5.0)).collect();
        let iface = interface(&[3, 5, 8, 16]);
        let enc = encode(&data, &iface).unwrap();

        let mut prev_max = f64::INFINITY;
        for level in 0..iface.len() {
            let decoded =
                decode_exact(&enc.buffers[..=level], &enc.params, &iface, data.len()).unwrap();
            let bound = enc.params.error_bound(iface.bits_through(level));
            let max_err = decoded
                .iter()
                .zip(&data)
                .map(|(d, x)| (*d as f64 - *x as f64).abs())
                .fold(0.0, f64::max);
            assert!(max_err <= bound + 1e-5, "level {level}: {max_err} > {bound}");
            assert!(max_err <= prev_max + 1e-6);
            prev_max = max_err;
        }
    }

    #[test]
    fn test_byte_size_accounting() {
        let data: Vec<f32> = (0..13).map(|i| i as f32 * 0.25).collect();
        let iface = interface(&[3, 7, 22]);
        let enc = encode(&data, &iface).unwrap();
        assert_eq!(enc.byte_sizes(), vec![5, 12, 36]);
        assert_eq!(enc.total_bytes(), 53);
    }

    #[test]
    fn test_prefix_ignores_later_levels() {
        let data = [1.0f32, -2.0, 0.5, 3.25];
        let iface = interface(&[4, 4, 8]);
        let enc = encode(&data, &iface).unwrap();
        let before = decode(&enc.buffers[..2], &enc.params, &iface).unwrap();

        let mut tampered = enc.buffers.clone();
        tampered[2].iter_mut().for_each(|b| *b = 0xFF);
        let after = decode(&tampered[..2], &enc.params, &iface).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_decode_count_includes_padding() {
        // 3 values at 4 bits → 2 bytes → 4 unpacked values
        let iface = interface(&[4, 4]);
        let enc = encode(&[0.0, 1.0, 2.0], &iface).unwrap();
        assert_eq!(decode(&enc.buffers, &enc.params, &iface).unwrap().len(), 4);
        assert_eq!(
            decode_exact(&enc.buffers, &enc.params, &iface, 3).unwrap().len(),
            3
        );
    }

    #[test]
    fn test_decode_exact_short_buffer() {
        let iface = interface(&[8, 8]);
        let enc = encode(&[0.0, 1.0], &iface).unwrap();
        let err = decode_exact(&enc.buffers, &enc.params, &iface, 3).unwrap_err();
        assert_eq!(err, CodecError::ShortBuffer { level: 0, expected: 3, got: 2 });
    }

    #[test]
    fn test_constant_tensor() {
        let iface = interface(&[4, 4]);
        let enc = encode(&[2.5; 6], &iface).unwrap();
        assert_eq!(enc.params, QuantizationParams { scale: 1.0, min: 2.5 });
        assert!(enc.buffers.iter().flatten().all(|&b| b == 0));
        let decoded = decode_exact(&enc.buffers, &enc.params, &iface, 6).unwrap();
        let expected = (2.5 + 1.0 / 512.0) as f32;
        assert!(decoded.iter().all(|&v| v == expected));
    }

    #[test]
    fn test_empty_tensor() {
        let iface = interface(&[2, 2]);
        let enc = encode(&[], &iface).unwrap();
        assert_eq!(enc.byte_sizes(), vec![0, 0]);
        assert!(decode(&enc.buffers, &enc.params, &iface).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        let iface = interface(&[8]);
        assert!(matches!(
            encode(&[0.0, f32::NAN], &iface),
            Err(CodecError::NonFinite { index: 1, .. })
        ));

        let bad = QuantizationParams { scale: 0.0, min: 0.0 };
        assert!(matches!(
            decode(&[vec![0u8]], &bad, &iface),
            Err(CodecError::DegenerateRange { .. })
        ));

        let ok = QuantizationParams { scale: 1.0, min: 0.0 };
        let none: [Vec<u8>; 0] = [];
        assert_eq!(decode(&none, &ok, &iface), Err(CodecError::NoLevels));
        assert_eq!(
            decode(&[vec![0u8], vec![0u8]], &ok, &iface),
            Err(CodecError::TooManyLevels { supplied: 2, levels: 1 })
        );
    }

    #[test]
    fn test_accumulator_matches_decode() {
        let mut rng = StdRng::seed_from_u64(11);
        let data: Vec<f32> = (0..257).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let iface = BitWidthInterface::default_progressive();
        let enc = encode(&data, &iface).unwrap();

        let mut acc = LevelAccumulator::new(iface.clone(), enc.params, data.len()).unwrap();
        assert_eq!(acc.values(), Err(CodecError::NoLevels));
        for level in 0..iface.len() {
            acc.push_level(&enc.buffers[level]).unwrap();
            let expected =
                decode_exact(&enc.buffers[..=level], &enc.params, &iface, data.len()).unwrap();
            assert_eq!(acc.values().unwrap(), expected, "level {level}");
        }
        assert_eq!(acc.levels_merged(), 8);
        assert_eq!(acc.bits_used(), 16);
        assert!(acc.check_level(&enc.buffers[0]).is_err());
        assert!(acc.push_level(&enc.buffers[0]).is_err());
    }

    #[test]
    fn test_short_level_leaves_accumulator_untouched() {
        let iface = interface(&[4, 4]);
        let enc = encode(&SCENARIO, &iface).unwrap();
        let mut acc = LevelAccumulator::new(iface, enc.params, SCENARIO.len()).unwrap();
        acc.push_level(&enc.buffers[0]).unwrap();
        let before = acc.values().unwrap();

        let short = &enc.buffers[1][..3];
        assert_eq!(
            acc.check_level(short),
            Err(CodecError::ShortBuffer { level: 1, expected: 8, got: 6 })
        );
        assert!(acc.push_level(short).is_err());
        assert_eq!(acc.levels_merged(), 1);
        assert_eq!(acc.values().unwrap(), before);
    }
}
