//! Partition writer: the producer side of the wire format.
//!
//! Float32 tensors are encoded into one buffer per level and appended to
//! the matching partition; int32 tensors travel verbatim in partition 0.
//! The output directory holds `part-<i>.bin`, `progressive.json` and a
//! `model.json` without `weightsManifest`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pgnet_codec::{encode, BitWidthInterface};
use pgnet_core::{Tensor, TensorData};

use crate::descriptor::ModelDescriptor;
use crate::error::ConvertError;
use crate::loader::{MANIFEST_FILE, MODEL_FILE};
use crate::manifest::{LayerDType, LayerDescriptor, PartitionManifest};

/// File name of partition `level`.
pub fn partition_file_name(level: usize) -> String {
    format!("part-{level}.bin")
}

/// Accumulates tensors into per-level partitions.
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    interface: BitWidthInterface,
    layers: Vec<LayerDescriptor>,
    parts: Vec<Vec<u8>>,
    names: HashSet<String>,
}

/// What a conversion produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSummary {
    pub output: PathBuf,
    pub layers: usize,
    pub float_layers: usize,
    pub int_layers: usize,
    pub part_bytes: Vec<usize>,
}

impl ConvertSummary {
    pub fn total_bytes(&self) -> usize {
        self.part_bytes.iter().sum()
    }
}

impl PartitionWriter {
    pub fn new(interface: BitWidthInterface) -> Self {
        let parts = vec![Vec::new(); interface.len()];
        Self {
            interface,
            layers: Vec::new(),
            parts,
            names: HashSet::new(),
        }
    }

    pub fn interface(&self) -> &BitWidthInterface {
        &self.interface
    }

    /// Append one tensor; partitions keep insertion order.
    pub fn add_tensor(&mut self, name: &str, tensor: &Tensor) -> Result<(), ConvertError> {
        if !self.names.insert(name.to_string()) {
            return Err(ConvertError::DuplicateTensor(name.to_string()));
        }
        let levels = self.interface.len();

        let layer = match tensor.data() {
            TensorData::F32(data) => {
                let encoded = encode(data, &self.interface).map_err(|source| ConvertError::Codec {
                    name: name.to_string(),
                    source,
                })?;
                let byte_sizes = encoded.byte_sizes();
                for (part, buffer) in self.parts.iter_mut().zip(&encoded.buffers) {
                    part.extend_from_slice(buffer);
                }
                LayerDescriptor {
                    name: name.to_string(),
                    shape: tensor.shape().dims().to_vec(),
                    dtype: LayerDType::Float32,
                    byte_sizes,
                    quantization: Some(encoded.params),
                }
            }
            TensorData::I32(_) => {
                let bytes = tensor.to_le_bytes();
                let mut byte_sizes = vec![0; levels];
                byte_sizes[0] = bytes.len();
                self.parts[0].extend_from_slice(&bytes);
                LayerDescriptor {
                    name: name.to_string(),
                    shape: tensor.shape().dims().to_vec(),
                    dtype: LayerDType::Int32,
                    byte_sizes,
                    quantization: None,
                }
            }
        };
        self.layers.push(layer);
        Ok(())
    }

    pub fn manifest(&self) -> PartitionManifest {
        PartitionManifest {
            layers: self.layers.clone(),
            files: (0..self.interface.len()).map(partition_file_name).collect(),
            dividing_interface: self.interface.clone(),
        }
    }

    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }

    /// Manifest plus partition bytes, for in-memory hosting.
    pub fn finish(self) -> (PartitionManifest, Vec<Vec<u8>>) {
        let manifest = self.manifest();
        (manifest, self.parts)
    }

    /// Write the partitions, manifest and descriptor into `dir`.
    ///
    /// Refuses a non-empty `dir` unless `force` is set.
    pub fn write_to(
        self,
        dir: &Path,
        descriptor: &ModelDescriptor,
        force: bool,
    ) -> Result<ConvertSummary, ConvertError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ConvertError::Io { path, source }
        };

        if dir.exists() && !force {
            let mut entries = std::fs::read_dir(dir).map_err(io_err(dir))?;
            if entries.next().is_some() {
                return Err(ConvertError::OutputNotEmpty(dir.to_path_buf()));
            }
        }
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;

        let manifest = self.manifest();
        for (file, bytes) in manifest.files.iter().zip(&self.parts) {
            let path = dir.join(file);
            std::fs::write(&path, bytes).map_err(io_err(&path))?;
            tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_json = serde_json::to_vec(&manifest).map_err(|source| ConvertError::Json {
            path: manifest_path.clone(),
            source,
        })?;
        std::fs::write(&manifest_path, manifest_json).map_err(io_err(&manifest_path))?;

        let model_path = dir.join(MODEL_FILE);
        let model_json = serde_json::to_vec(descriptor).map_err(|source| ConvertError::Json {
            path: model_path.clone(),
            source,
        })?;
        std::fs::write(&model_path, model_json).map_err(io_err(&model_path))?;

        let float_layers = self
            .layers
            .iter()
            .filter(|l| l.dtype == LayerDType::Float32)
            .count();
        let summary = ConvertSummary {
            output: dir.to_path_buf(),
            layers: self.layers.len(),
            float_layers,
            int_layers: self.layers.len() - float_layers,
            part_bytes: self.parts.iter().map(Vec::len).collect(),
        };
        tracing::info!(
            "Wrote {} layers into {} partitions ({} bytes) in {}",
            summary.layers,
            summary.part_bytes.len(),
            summary.total_bytes(),
            dir.display()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer() -> PartitionWriter {
        let mut w = PartitionWriter::new(BitWidthInterface::new(vec![4, 12]).unwrap());
        w.add_tensor("w", &Tensor::from_f32(vec![0.0, 1.0, 2.0], &[3]).unwrap())
            .unwrap();
        w.add_tensor("ids", &Tensor::from_i32(vec![5, 6], &[2]).unwrap())
            .unwrap();
        w
    }

    #[test]
    fn test_partition_layout() {
        let w = writer();
        let m = w.manifest();
        m.validate().unwrap();
        assert_eq!(m.files, vec!["part-0.bin", "part-1.bin"]);
        assert_eq!(m.layers[0].byte_sizes, vec![2, 5]);
        assert_eq!(m.layers[1].byte_sizes, vec![8, 0]);
        assert_eq!(w.parts()[0].len(), 10);
        assert_eq!(w.parts()[1].len(), 5);
        assert_eq!(&w.parts()[0][2..6], &5i32.to_le_bytes());
    }

    #[test]
    fn test_duplicate_name() {
        let mut w = writer();
        let t = Tensor::from_f32(vec![1.0], &[1]).unwrap();
        assert!(matches!(w.add_tensor("w", &t), Err(ConvertError::DuplicateTensor(_))));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("model");
        let descriptor = ModelDescriptor::from_json(json!({
            "format": "graph-model",
            "modelTopology": { "node": [] },
            "weightsManifest": []
        }))
        .unwrap();

        let summary = writer().write_to(&out, &descriptor, false).unwrap();
        assert_eq!(summary.layers, 2);
        assert_eq!(summary.float_layers, 1);
        assert_eq!(summary.total_bytes(), 15);

        let model: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("model.json")).unwrap()).unwrap();
        assert!(model.get("weightsManifest").is_none());
        let manifest =
            PartitionManifest::from_slice(&std::fs::read(out.join("progressive.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(std::fs::read(out.join("part-1.bin")).unwrap().len(), 5);

        assert!(matches!(
            writer().write_to(&out, &descriptor, false),
            Err(ConvertError::OutputNotEmpty(_))
        ));
        assert!(writer().write_to(&out, &descriptor, true).is_ok());
    }
}
