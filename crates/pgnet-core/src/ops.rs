//! Kernels needed to run the built-in model shells.
//!
//! Only f32 is supported; integer tensors are weights-only in practice.

use crate::error::CoreError;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Matrix multiplication: `[M, K] @ [K, N] → [M, N]`.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let a = f32_data(self, "matmul")?;
        let b = f32_data(other, "matmul")?;

        let a_dims = self.shape().dims();
        let b_dims = other.shape().dims();
        if a_dims.len() != 2 || b_dims.len() != 2 {
            return Err(CoreError::ShapeMismatch {
                expected: a_dims.to_vec(),
                got: b_dims.to_vec(),
            });
        }

        let (m, k1) = (a_dims[0], a_dims[1]);
        let (k2, n) = (b_dims[0], b_dims[1]);
        if k1 != k2 {
            return Err(CoreError::MatmulDimMismatch { m, k1, k2, n });
        }

        let mut out = vec![0.0f32; m * n];
        for i in 0..m {
            let row = &a[i * k1..(i + 1) * k1];
            let out_row = &mut out[i * n..(i + 1) * n];
            for (p, &a_ip) in row.iter().enumerate() {
                if a_ip == 0.0 {
                    continue;
                }
                let b_row = &b[p * n..(p + 1) * n];
                for (o, &b_pj) in out_row.iter_mut().zip(b_row) {
                    *o += a_ip * b_pj;
                }
            }
        }
        Tensor::from_f32(out, &[m, n])
    }

    /// Add a 1-D `bias` along the innermost dimension.
    pub fn bias_add(&self, bias: &Tensor) -> Result<Tensor> {
        let x = f32_data(self, "bias_add")?;
        let b = f32_data(bias, "bias_add")?;
        let inner = self.shape().last_dim();
        if bias.shape().ndim() != 1 || b.len() != inner {
            return Err(CoreError::ShapeMismatch {
                expected: vec![inner],
                got: bias.shape().dims().to_vec(),
            });
        }
        let out: Vec<f32> = x
            .chunks(inner.max(1))
            .flat_map(|row| row.iter().zip(b).map(|(v, bb)| v + bb))
            .collect();
        Tensor::from_f32(out, self.shape().dims())
    }

    /// Element-wise addition. `other` may also be a 1-D bias over the
    /// innermost dimension.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        if self.shape() == other.shape() {
            let a = f32_data(self, "add")?;
            let b = f32_data(other, "add")?;
            let out = a.iter().zip(b).map(|(x, y)| x + y).collect();
            return Tensor::from_f32(out, self.shape().dims());
        }
        self.bias_add(other)
    }

    pub fn relu(&self) -> Result<Tensor> {
        unary_op(self, "relu", |v| v.max(0.0))
    }

    pub fn relu6(&self) -> Result<Tensor> {
        unary_op(self, "relu6", |v| v.clamp(0.0, 6.0))
    }

    pub fn sigmoid(&self) -> Result<Tensor> {
        unary_op(self, "sigmoid", |v| 1.0 / (1.0 + (-v).exp()))
    }

    pub fn tanh(&self) -> Result<Tensor> {
        unary_op(self, "tanh", f32::tanh)
    }

    /// Numerically stable softmax over the innermost dimension.
    pub fn softmax(&self) -> Result<Tensor> {
        let x = f32_data(self, "softmax")?;
        let inner = self.shape().last_dim().max(1);
        let mut out = Vec::with_capacity(x.len());
        for row in x.chunks(inner) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            out.extend(exps.into_iter().map(|e| e / sum));
        }
        Tensor::from_f32(out, self.shape().dims())
    }

    /// Collapse every dimension after the first: `[B, ...] → [B, N]`.
    pub fn flatten(&self) -> Result<Tensor> {
        match self.shape().ndim() {
            0 | 1 => self.reshape(&[1, -1]),
            _ => self.reshape(&[self.shape().dims()[0] as isize, -1]),
        }
    }
}

/// Indices and values of the `k` largest entries, highest first.
///
/// NaNs sort last.
pub fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or_else(|| a.1.is_nan().cmp(&b.1.is_nan()))
    });
    indexed.truncate(k);
    indexed
}

fn f32_data<'a>(t: &'a Tensor, op: &'static str) -> Result<&'a [f32]> {
    t.as_f32_slice()
        .ok_or(CoreError::UnsupportedDType { op, dtype: t.dtype() })
}

fn unary_op(a: &Tensor, op: &'static str, f: impl Fn(f32) -> f32) -> Result<Tensor> {
    let data = f32_data(a, op)?;
    Tensor::from_f32(data.iter().map(|&v| f(v)).collect(), a.shape().dims())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_matmul_2x3_3x2() {
        let a = Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = Tensor::from_f32(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape().dims(), &[2, 2]);
        assert_eq!(c.as_f32_slice().unwrap(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let a = Tensor::zeros(&[2, 3], DType::F32);
        let b = Tensor::zeros(&[2, 3], DType::F32);
        assert!(matches!(
            a.matmul(&b),
            Err(CoreError::MatmulDimMismatch { k1: 3, k2: 2, .. })
        ));
    }

    #[test]
    fn test_bias_add_rows() {
        let x = Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = Tensor::from_f32(vec![10.0, 20.0], &[2]).unwrap();
        let y = x.add(&b).unwrap();
        assert_eq!(y.as_f32_slice().unwrap(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = Tensor::from_f32(vec![1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0], &[2, 3]).unwrap();
        let y = x.softmax().unwrap();
        let data = y.as_f32_slice().unwrap();
        for row in data.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert!(data[2] > data[1] && data[1] > data[0]);
    }

    #[test]
    fn test_relu6_clamps() {
        let x = Tensor::from_f32(vec![-1.0, 3.0, 9.0], &[3]).unwrap();
        assert_eq!(x.relu6().unwrap().as_f32_slice().unwrap(), &[0.0, 3.0, 6.0]);
    }

    #[test]
    fn test_int_rejected() {
        let x = Tensor::zeros(&[2], DType::I32);
        assert!(matches!(
            x.relu(),
            Err(CoreError::UnsupportedDType { op: "relu", .. })
        ));
    }

    #[test]
    fn test_top_k() {
        let top = top_k(&[0.1, 0.7, f32::NAN, 0.2], 2);
        assert_eq!(top, vec![(1, 0.7), (3, 0.2)]);
    }

    #[test]
    fn test_flatten() {
        let x = Tensor::zeros(&[2, 3, 4], DType::F32);
        assert_eq!(x.flatten().unwrap().shape().dims(), &[2, 12]);
    }
}
