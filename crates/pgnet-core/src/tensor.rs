use std::fmt;

use crate::dtype::DType;
use crate::error::CoreError;
use crate::shape::Shape;
use crate::Result;

/// Owned element buffer of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dense, row-major CPU tensor.
///
/// Progressive loading rebuilds every weight tensor from scratch at each
/// step, so tensors own their data and are cheap to replace wholesale.
///
/// # Examples
///
/// ```
/// use pgnet_core::Tensor;
///
/// let t = Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// assert_eq!(t.numel(), 4);
///
/// let flat = t.reshape(&[-1]).unwrap();
/// assert_eq!(flat.shape().dims(), &[4]);
/// ```
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
    shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from f32 data with the given shape.
    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::F32(data), Shape::new(shape))
    }

    /// Create a tensor from i32 data with the given shape.
    pub fn from_i32(data: Vec<i32>, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::I32(data), Shape::new(shape))
    }

    /// Create a tensor from an element buffer, checking the element count.
    pub fn new(data: TensorData, shape: Shape) -> Result<Self> {
        let expected = shape.checked_numel().ok_or_else(|| CoreError::ShapeOverflow {
            shape: shape.dims().to_vec(),
        })?;
        if expected != data.len() {
            return Err(CoreError::ElementCount {
                shape: shape.dims().to_vec(),
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// Reinterpret little-endian bytes as elements of `dtype`.
    pub fn from_le_bytes(dtype: DType, bytes: &[u8], shape: &[usize]) -> Result<Self> {
        if bytes.len() % dtype.element_size() != 0 {
            return Err(CoreError::ByteLength {
                dtype,
                len: bytes.len(),
            });
        }
        let data = match dtype {
            DType::F32 => TensorData::F32(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            DType::I32 => TensorData::I32(
                bytes
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
        };
        Self::new(data, Shape::new(shape))
    }

    /// Create a tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        let numel = s.numel();
        let data = match dtype {
            DType::F32 => TensorData::F32(vec![0.0; numel]),
            DType::I32 => TensorData::I32(vec![0; numel]),
        };
        Self { data, shape: s }
    }

    /// Create an f32 tensor with every element set to `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let s = Shape::new(shape);
        Self {
            data: TensorData::F32(vec![value; s.numel()]),
            shape: s,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Borrow the elements as f32, or `None` for integer tensors.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::I32(_) => None,
        }
    }

    /// Borrow the elements as i32, or `None` for float tensors.
    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::I32(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    /// Elements converted to f32 (integers are widened).
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::I32(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Serialize elements as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Reshape to `target`, where at most one dimension may be -1.
    pub fn reshape(&self, target: &[isize]) -> Result<Tensor> {
        let shape = self
            .shape
            .resolve_reshape(target)
            .ok_or_else(|| CoreError::InvalidReshape {
                from: self.shape.dims().to_vec(),
                to: target.to_vec(),
            })?;
        Ok(Tensor {
            data: self.data.clone(),
            shape,
        })
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}, dtype={})", self.shape, self.dtype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count_checked() {
        assert!(Tensor::from_f32(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
        assert!(Tensor::from_i32(vec![1, 2, 3, 4], &[2, 2]).is_ok());
        assert!(matches!(
            Tensor::from_f32(vec![], &[1 << 32, 1 << 32, 2]),
            Err(CoreError::ShapeOverflow { .. })
        ));
    }

    #[test]
    fn test_le_bytes_roundtrip_i32() {
        let t = Tensor::from_i32(vec![-1, 0, 7, i32::MAX], &[4]).unwrap();
        let bytes = t.to_le_bytes();
        assert_eq!(bytes.len(), 16);
        let back = Tensor::from_le_bytes(DType::I32, &bytes, &[4]).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_le_bytes_bad_length() {
        let err = Tensor::from_le_bytes(DType::I32, &[0u8; 5], &[1]).unwrap_err();
        assert!(matches!(err, CoreError::ByteLength { len: 5, .. }));
    }

    #[test]
    fn test_full_and_zeros() {
        let t = Tensor::full(&[2, 3], 0.5);
        assert_eq!(t.as_f32_slice().unwrap(), &[0.5; 6]);
        let z = Tensor::zeros(&[3], DType::I32);
        assert_eq!(z.as_i32_slice().unwrap(), &[0, 0, 0]);
        assert!(z.as_f32_slice().is_none());
    }

    #[test]
    fn test_reshape_infers() {
        let t = Tensor::zeros(&[2, 3, 4], DType::F32);
        let r = t.reshape(&[2, -1]).unwrap();
        assert_eq!(r.shape().dims(), &[2, 12]);
        assert!(t.reshape(&[5, -1]).is_err());
    }
}
