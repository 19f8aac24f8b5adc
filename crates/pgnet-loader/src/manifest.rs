//! `progressive.json`: per-layer layout of every partition file.
//!
//! ```text
//! {
//!   "layers": [
//!     { "name": "dense/kernel", "shape": [784, 10], "dtype": "float32",
//!       "byteSizes": [1960, 1960, ...], "quantization": { "scale": 0.8, "min": -0.4 } },
//!     { "name": "ids", "shape": [4], "dtype": "int32", "byteSizes": [16, 0, ...] }
//!   ],
//!   "files": ["part-0.bin", "part-1.bin", ...],
//!   "dividingInterface": [2, 2, 2, 2, 2, 2, 2, 2]
//! }
//! ```
//!
//! Partition `k` is the concatenation of every layer's level-`k` bytes in
//! manifest order.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use pgnet_codec::packing::checked_packed_len;
use pgnet_codec::BitWidthInterface;
pub use pgnet_codec::QuantizationParams;
use pgnet_core::{DType, NamedTensors, Tensor};

use crate::error::LoadError;

/// Manifest element type. Unknown tags are kept so they can be reported
/// by name during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayerDType {
    Float32,
    Int32,
    Unsupported(String),
}

impl LayerDType {
    pub fn as_str(&self) -> &str {
        match self {
            LayerDType::Float32 => "float32",
            LayerDType::Int32 => "int32",
            LayerDType::Unsupported(s) => s,
        }
    }

    /// The tensor dtype, if supported.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            LayerDType::Float32 => Some(DType::F32),
            LayerDType::Int32 => Some(DType::I32),
            LayerDType::Unsupported(_) => None,
        }
    }
}

impl From<String> for LayerDType {
    fn from(s: String) -> Self {
        match DType::from_str(&s) {
            Some(DType::F32) => LayerDType::Float32,
            Some(DType::I32) => LayerDType::Int32,
            None => LayerDType::Unsupported(s),
        }
    }
}

impl From<LayerDType> for String {
    fn from(d: LayerDType) -> Self {
        d.as_str().to_string()
    }
}

impl From<DType> for LayerDType {
    fn from(d: DType) -> Self {
        match d {
            DType::F32 => LayerDType::Float32,
            DType::I32 => LayerDType::Int32,
        }
    }
}

impl fmt::Display for LayerDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tensor's entry in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: LayerDType,
    #[serde(rename = "byteSizes")]
    pub byte_sizes: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationParams>,
}

impl LayerDescriptor {
    /// Element count; a shape whose product overflows is malformed.
    pub fn numel(&self) -> Result<usize, LoadError> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| self.too_large())
    }

    fn too_large(&self) -> LoadError {
        LoadError::MalformedManifest(format!(
            "layer '{}' with shape {:?} is too large to address",
            self.name, self.shape
        ))
    }

    pub fn total_bytes(&self) -> usize {
        self.byte_sizes.iter().sum()
    }

    /// Quantization parameters of a float32 layer.
    pub fn params(&self) -> Result<&QuantizationParams, LoadError> {
        self.quantization.as_ref().ok_or_else(|| {
            LoadError::MalformedManifest(format!(
                "float32 layer '{}' has no quantization parameters",
                self.name
            ))
        })
    }

    fn validate(&self, interface: &BitWidthInterface) -> Result<(), LoadError> {
        let levels = interface.len();
        if self.byte_sizes.len() != levels {
            return Err(LoadError::MalformedManifest(format!(
                "layer '{}' has {} byte sizes for {} levels",
                self.name,
                self.byte_sizes.len(),
                levels
            )));
        }
        let numel = self.numel()?;

        match &self.dtype {
            LayerDType::Float32 => {
                let params = self.params()?;
                if params.validate().is_err() {
                    return Err(LoadError::DegenerateQuantizationRange {
                        layer: self.name.clone(),
                        scale: params.scale,
                        min: params.min,
                    });
                }
                for (level, &size) in self.byte_sizes.iter().enumerate() {
                    let needed = checked_packed_len(numel, interface.width(level))
                        .ok_or_else(|| self.too_large())?;
                    if size < needed {
                        return Err(LoadError::MalformedManifest(format!(
                            "layer '{}' level {level} is {size} bytes, {numel} elements need {needed}",
                            self.name
                        )));
                    }
                }
            }
            LayerDType::Int32 => {
                let needed = DType::I32
                    .checked_storage_bytes(numel)
                    .ok_or_else(|| self.too_large())?;
                if self.byte_sizes[0] != needed || self.byte_sizes[1..].iter().any(|&s| s != 0) {
                    return Err(LoadError::MalformedManifest(format!(
                        "int32 layer '{}' must carry {needed} bytes at level 0 only, got {:?}",
                        self.name, self.byte_sizes
                    )));
                }
            }
            LayerDType::Unsupported(dtype) => {
                return Err(LoadError::UnsupportedDtype {
                    layer: self.name.clone(),
                    dtype: dtype.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Parsed `progressive.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub layers: Vec<LayerDescriptor>,
    pub files: Vec<String>,
    #[serde(rename = "dividingInterface")]
    pub dividing_interface: BitWidthInterface,
}

impl PartitionManifest {
    /// Parse and validate a manifest document.
    pub fn from_json(value: serde_json::Value) -> Result<Self, LoadError> {
        let manifest: Self = serde_json::from_value(value)
            .map_err(|e| LoadError::MalformedManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LoadError> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| LoadError::MalformedManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the structural invariants the loader relies on.
    pub fn validate(&self) -> Result<(), LoadError> {
        let levels = self.dividing_interface.len();
        if self.files.len() != levels {
            return Err(LoadError::MalformedManifest(format!(
                "{} files listed for {} levels",
                self.files.len(),
                levels
            )));
        }
        let mut seen = HashSet::with_capacity(self.layers.len());
        for layer in &self.layers {
            if !seen.insert(layer.name.as_str()) {
                return Err(LoadError::MalformedManifest(format!(
                    "duplicate layer name '{}'",
                    layer.name
                )));
            }
            layer.validate(&self.dividing_interface)?;
        }
        // step_len and total_bytes sum without checks once this passes.
        self.layers
            .iter()
            .flat_map(|l| l.byte_sizes.iter())
            .try_fold(0usize, |acc, &s| acc.checked_add(s))
            .ok_or_else(|| {
                LoadError::MalformedManifest("partition byte sizes overflow".to_string())
            })?;
        Ok(())
    }

    pub fn interface(&self) -> &BitWidthInterface {
        &self.dividing_interface
    }

    pub fn num_levels(&self) -> usize {
        self.dividing_interface.len()
    }

    pub fn layer(&self, name: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Expected byte length of partition `step`.
    pub fn step_len(&self, step: usize) -> usize {
        self.layers.iter().map(|l| l.byte_sizes[step]).sum()
    }

    /// Total bytes across every partition.
    pub fn total_bytes(&self) -> usize {
        self.layers.iter().map(LayerDescriptor::total_bytes).sum()
    }

    /// Slice partition `step` into per-layer byte ranges, in manifest order.
    pub fn split_partition<'a>(
        &'a self,
        step: usize,
        bytes: &'a [u8],
    ) -> Result<Vec<(&'a LayerDescriptor, &'a [u8])>, LoadError> {
        let expected = self.step_len(step);
        if bytes.len() != expected {
            return Err(LoadError::PartitionSizeMismatch {
                step,
                expected,
                got: bytes.len(),
            });
        }
        let mut cursor = 0;
        let mut slices = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let len = layer.byte_sizes[step];
            slices.push((layer, &bytes[cursor..cursor + len]));
            cursor += len;
        }
        Ok(slices)
    }

    /// Placeholder weights usable before any partition lands: float32
    /// layers filled with the centre of their range, int32 layers zeroed.
    pub fn midpoint_weights(&self) -> Result<NamedTensors, LoadError> {
        let mut weights = NamedTensors::with_capacity(self.layers.len());
        for layer in &self.layers {
            let tensor = match layer.dtype {
                LayerDType::Float32 => {
                    Tensor::full(&layer.shape, layer.params()?.midpoint() as f32)
                }
                LayerDType::Int32 => Tensor::zeros(&layer.shape, DType::I32),
                LayerDType::Unsupported(ref dtype) => {
                    return Err(LoadError::UnsupportedDtype {
                        layer: layer.name.clone(),
                        dtype: dtype.clone(),
                    })
                }
            };
            weights.insert(layer.name.clone(), tensor);
        }
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "layers": [
                { "name": "w", "shape": [2, 3], "dtype": "float32",
                  "byteSizes": [2, 3], "quantization": { "scale": 2.0, "min": -1.0 } },
                { "name": "ids", "shape": [2], "dtype": "int32", "byteSizes": [8, 0] }
            ],
            "files": ["part-0.bin", "part-1.bin"],
            "dividingInterface": [2, 4]
        })
    }

    #[test]
    fn test_parse_and_split() {
        let m = PartitionManifest::from_json(sample()).unwrap();
        assert_eq!(m.num_levels(), 2);
        assert_eq!(m.step_len(0), 10);
        assert_eq!(m.step_len(1), 3);

        let part: Vec<u8> = (0..10).collect();
        let slices = m.split_partition(0, &part).unwrap();
        assert_eq!(slices[0].0.name, "w");
        assert_eq!(slices[0].1, &[0, 1]);
        assert_eq!(slices[1].1, &[2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_partition_size_mismatch() {
        let m = PartitionManifest::from_json(sample()).unwrap();
        assert!(matches!(
            m.split_partition(1, &[0; 4]),
            Err(LoadError::PartitionSizeMismatch { step: 1, expected: 3, got: 4 })
        ));
    }

    #[test]
    fn test_unsupported_dtype() {
        let mut v = sample();
        v["layers"][1]["dtype"] = json!("bool");
        match PartitionManifest::from_json(v) {
            Err(LoadError::UnsupportedDtype { layer, dtype }) => {
                assert_eq!(layer, "ids");
                assert_eq!(dtype, "bool");
            }
            other => panic!("expected UnsupportedDtype, got {other:?}"),
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut v = sample();
        v["layers"][0]["quantization"]["scale"] = json!(0.0);
        assert!(matches!(
            PartitionManifest::from_json(v),
            Err(LoadError::DegenerateQuantizationRange { .. })
        ));
    }

    #[test]
    fn test_structural_checks() {
        let mut v = sample();
        v["files"] = json!(["part-0.bin"]);
        assert!(matches!(PartitionManifest::from_json(v), Err(LoadError::MalformedManifest(_))));

        let mut v = sample();
        v["layers"][1]["name"] = json!("w");
        assert!(matches!(PartitionManifest::from_json(v), Err(LoadError::MalformedManifest(_))));

        let mut v = sample();
        v["layers"][1]["byteSizes"] = json!([8, 4]);
        assert!(matches!(PartitionManifest::from_json(v), Err(LoadError::MalformedManifest(_))));

        let mut v = sample();
        v["dividingInterface"] = json!([20, 20]);
        assert!(matches!(PartitionManifest::from_json(v), Err(LoadError::MalformedManifest(_))));
    }

    #[test]
    fn test_oversized_shape_is_rejected() {
        let mut v = sample();
        v["layers"][0]["shape"] = json!([4294967296u64, 4294967296u64, 2]);
        match PartitionManifest::from_json(v) {
            Err(LoadError::MalformedManifest(msg)) => assert!(msg.contains("too large"), "{msg}"),
            other => panic!("expected MalformedManifest, got {other:?}"),
        }

        // The element count fits; the 4-bit level's bit count does not.
        let mut v = sample();
        v["layers"][0]["shape"] = json!([usize::MAX / 3]);
        v["layers"][0]["byteSizes"] = json!([usize::MAX, 3]);
        match PartitionManifest::from_json(v) {
            Err(LoadError::MalformedManifest(msg)) => assert!(msg.contains("too large"), "{msg}"),
            other => panic!("expected MalformedManifest, got {other:?}"),
        }

        let mut v = sample();
        v["layers"][1]["shape"] = json!([usize::MAX / 2]);
        match PartitionManifest::from_json(v) {
            Err(LoadError::MalformedManifest(msg)) => assert!(msg.contains("too large"), "{msg}"),
            other => panic!("expected MalformedManifest, got {other:?}"),
        }
    }

    #[test]
    fn test_byte_size_sum_overflow_is_rejected() {
        let mut v = sample();
        v["layers"][0]["byteSizes"] = json!([usize::MAX, 3]);
        assert!(matches!(PartitionManifest::from_json(v), Err(LoadError::MalformedManifest(_))));
    }

    #[test]
    fn test_midpoint_weights() {
        let m = PartitionManifest::from_json(sample()).unwrap();
        let w = m.midpoint_weights().unwrap();
        assert_eq!(w["w"].as_f32_slice().unwrap(), &[0.0; 6]);
        assert_eq!(w["ids"].as_i32_slice().unwrap(), &[0, 0]);
    }

    #[test]
    fn test_serialize_omits_absent_quantization() {
        let m = PartitionManifest::from_json(sample()).unwrap();
        let out = serde_json::to_value(&m).unwrap();
        assert_eq!(out["layers"][1].get("quantization"), None);
        assert_eq!(out["layers"][1]["dtype"], "int32");
        assert_eq!(out["dividingInterface"], json!([2, 4]));
    }
}
