//! Read source models for conversion.
//!
//! A source directory holds a `model.json` plus its weights, either as
//! TF.js shard files listed in `weightsManifest` or as `*.safetensors`
//! files next to it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use pgnet_core::{DType, Tensor};

use crate::descriptor::ModelDescriptor;
use crate::error::ConvertError;
use crate::loader::MODEL_FILE;

/// A model ready to be partitioned: descriptor plus tensors in file order.
#[derive(Debug, Clone)]
pub struct SourceModel {
    pub descriptor: ModelDescriptor,
    pub tensors: Vec<(String, Tensor)>,
}

#[derive(Debug, Deserialize)]
struct WeightGroup {
    paths: Vec<String>,
    weights: Vec<WeightEntry>,
}

#[derive(Debug, Deserialize)]
struct WeightEntry {
    name: String,
    shape: Vec<usize>,
    dtype: String,
    #[serde(default)]
    quantization: Option<serde_json::Value>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConvertError {
    let path = path.to_path_buf();
    move |source| ConvertError::Io { path, source }
}

fn read_descriptor(dir: &Path) -> Result<ModelDescriptor, ConvertError> {
    let path = dir.join(MODEL_FILE);
    let bytes = std::fs::read(&path).map_err(io_err(&path))?;
    serde_json::from_slice(&bytes).map_err(|source| ConvertError::Json { path, source })
}

/// Read `dir/model.json` and its weights, whichever form they take.
pub fn read_model_dir(dir: &Path) -> Result<SourceModel, ConvertError> {
    let descriptor = read_descriptor(dir)?;
    if descriptor.weights_manifest.is_some() {
        read_tfjs_model(dir)
    } else {
        let tensors = read_safetensors_dir(dir)?;
        Ok(SourceModel { descriptor, tensors })
    }
}

/// Read a TF.js model: `model.json` and the shards its `weightsManifest`
/// lists. Shards of a group are concatenated and sliced in entry order.
pub fn read_tfjs_model(dir: &Path) -> Result<SourceModel, ConvertError> {
    let descriptor = read_descriptor(dir)?;
    let manifest = descriptor.weights_manifest.clone().ok_or_else(|| {
        ConvertError::InvalidSource(format!("{} has no weightsManifest", dir.join(MODEL_FILE).display()))
    })?;
    let groups: Vec<WeightGroup> = serde_json::from_value(manifest)
        .map_err(|e| ConvertError::InvalidSource(format!("invalid weightsManifest: {e}")))?;

    let mut tensors = Vec::new();
    for group in &groups {
        let mut blob = Vec::new();
        for shard in &group.paths {
            let path = dir.join(shard);
            blob.extend(std::fs::read(&path).map_err(io_err(&path))?);
        }

        let mut offset = 0usize;
        for entry in &group.weights {
            if entry.quantization.is_some() {
                return Err(ConvertError::InvalidSource(format!(
                    "weight '{}' is already quantized",
                    entry.name
                )));
            }
            let dtype = DType::from_str(&entry.dtype).ok_or_else(|| ConvertError::UnsupportedDtype {
                name: entry.name.clone(),
                dtype: entry.dtype.clone(),
            })?;
            let end = entry
                .shape
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .and_then(|numel| dtype.checked_storage_bytes(numel))
                .and_then(|len| offset.checked_add(len))
                .ok_or_else(|| {
                    ConvertError::InvalidSource(format!(
                        "weight '{}' with shape {:?} is too large",
                        entry.name, entry.shape
                    ))
                })?;
            let bytes = blob.get(offset..end).ok_or_else(|| {
                ConvertError::InvalidSource(format!(
                    "weight '{}' needs bytes {}..{} but its shards hold {}",
                    entry.name,
                    offset,
                    end,
                    blob.len()
                ))
            })?;
            tensors.push((entry.name.clone(), Tensor::from_le_bytes(dtype, bytes, &entry.shape)?));
            offset = end;
        }
    }

    tracing::info!("Read {} tensors from {} weight groups in {}", tensors.len(), groups.len(), dir.display());
    Ok(SourceModel { descriptor, tensors })
}

/// Find `*.safetensors` files in `dir`, sorted by name.
fn find_safetensors_files(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();
    Ok(files)
}

/// Read every tensor from the `*.safetensors` files in `dir`.
///
/// F16 and BF16 widen to f32; I32 passes through. Tensors are ordered by
/// file, then by name.
pub fn read_safetensors_dir(dir: &Path) -> Result<Vec<(String, Tensor)>, ConvertError> {
    let files = find_safetensors_files(dir)?;
    if files.is_empty() {
        return Err(ConvertError::InvalidSource(format!(
            "no .safetensors files found in {}",
            dir.display()
        )));
    }

    let mut tensors = Vec::new();
    for path in &files {
        let bytes = std::fs::read(path).map_err(io_err(path))?;
        let st = safetensors::SafeTensors::deserialize(&bytes).map_err(|e| {
            ConvertError::Safetensors {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;

        let mut views = st.tensors();
        views.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, view) in views {
            let tensor = view_to_tensor(&name, &view)?;
            tensors.push((name, tensor));
        }
    }

    tracing::info!("Read {} tensors from {} safetensors files", tensors.len(), files.len());
    Ok(tensors)
}

fn view_to_tensor(name: &str, view: &safetensors::tensor::TensorView<'_>) -> Result<Tensor, ConvertError> {
    let data = view.data();
    let shape = view.shape();
    let tensor = match view.dtype() {
        safetensors::Dtype::F32 => Tensor::from_le_bytes(DType::F32, data, shape)?,
        safetensors::Dtype::I32 => Tensor::from_le_bytes(DType::I32, data, shape)?,
        safetensors::Dtype::F16 => Tensor::from_f32(
            data.chunks_exact(2)
                .map(|b| half::f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                .collect(),
            shape,
        )?,
        safetensors::Dtype::BF16 => Tensor::from_f32(
            data.chunks_exact(2)
                .map(|b| half::bf16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                .collect(),
            shape,
        )?,
        other => {
            return Err(ConvertError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{other:?}"),
            })
        }
    };
    Ok(tensor)
}
