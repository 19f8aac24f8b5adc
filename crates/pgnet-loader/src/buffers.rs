//! Per-layer byte slices accumulated across steps, and tensor
//! reconstruction from them.

use std::collections::HashMap;

use pgnet_codec::{decode_exact, BitWidthInterface, CodecError, LevelAccumulator};
use pgnet_core::{DType, NamedTensors, Tensor};

use crate::config::Reconstruction;
use crate::error::LoadError;
use crate::manifest::{LayerDType, LayerDescriptor, PartitionManifest};

/// Append-only record of every partition slice seen so far.
///
/// Entry `k` maps layer name to that layer's level-`k` bytes.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedBuffers {
    steps: Vec<HashMap<String, Vec<u8>>>,
}

impl AccumulatedBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: HashMap<String, Vec<u8>>) {
        self.steps.push(step);
    }

    /// Number of levels accumulated.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Level slices for `layer`, level 0 first. Stops at the first step
    /// that lacks the layer.
    pub fn layer_levels(&self, layer: &str) -> Vec<&[u8]> {
        self.steps
            .iter()
            .map_while(|step| step.get(layer).map(Vec::as_slice))
            .collect()
    }

    /// Total bytes held.
    pub fn byte_len(&self) -> usize {
        self.steps.iter().flat_map(|s| s.values()).map(Vec::len).sum()
    }
}

fn codec_err(layer: &LayerDescriptor) -> impl FnOnce(CodecError) -> LoadError {
    let layer = layer.name.clone();
    move |source| LoadError::Codec { layer, source }
}

/// Rebuild one layer's tensor from its accumulated level slices.
///
/// Float32 layers decode the whole prefix; int32 layers reinterpret the
/// level-0 bytes as little-endian integers.
pub fn reconstruct_layer(
    layer: &LayerDescriptor,
    levels: &[&[u8]],
    interface: &BitWidthInterface,
) -> Result<Tensor, LoadError> {
    match &layer.dtype {
        LayerDType::Float32 => {
            let params = layer.params()?;
            let data = decode_exact(levels, params, interface, layer.numel()?)
                .map_err(codec_err(layer))?;
            Ok(Tensor::from_f32(data, &layer.shape)?)
        }
        LayerDType::Int32 => {
            let bytes = levels.first().copied().unwrap_or(&[]);
            Ok(Tensor::from_le_bytes(DType::I32, bytes, &layer.shape)?)
        }
        LayerDType::Unsupported(dtype) => Err(LoadError::UnsupportedDtype {
            layer: layer.name.clone(),
            dtype: dtype.clone(),
        }),
    }
}

/// Per-layer running codes, merged one level per step.
#[derive(Debug, Clone, Default)]
pub struct IncrementalBuffers {
    accumulators: HashMap<String, LevelAccumulator>,
    raw: HashMap<String, Vec<u8>>,
    levels: usize,
}

impl IncrementalBuffers {
    pub fn len(&self) -> usize {
        self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels == 0
    }
}

/// Where the loader keeps partition data between steps.
#[derive(Debug, Clone)]
pub enum WeightStore {
    Redecode(AccumulatedBuffers),
    Incremental(IncrementalBuffers),
}

impl WeightStore {
    pub fn new(mode: Reconstruction) -> Self {
        match mode {
            Reconstruction::Redecode => WeightStore::Redecode(AccumulatedBuffers::new()),
            Reconstruction::Incremental => WeightStore::Incremental(IncrementalBuffers::default()),
        }
    }

    /// Levels merged so far.
    pub fn levels(&self) -> usize {
        match self {
            WeightStore::Redecode(b) => b.len(),
            WeightStore::Incremental(b) => b.len(),
        }
    }

    /// Merge one partition's slices and rebuild every layer.
    ///
    /// Nothing is recorded unless every slice is usable.
    pub fn apply(
        &mut self,
        manifest: &PartitionManifest,
        slices: &[(&LayerDescriptor, &[u8])],
    ) -> Result<NamedTensors, LoadError> {
        let interface = manifest.interface();
        let mut tensors = NamedTensors::with_capacity(slices.len());

        match self {
            WeightStore::Redecode(buffers) => {
                let step: HashMap<String, Vec<u8>> = slices
                    .iter()
                    .map(|(layer, bytes)| (layer.name.clone(), bytes.to_vec()))
                    .collect();
                for (layer, bytes) in slices {
                    let mut levels = buffers.layer_levels(&layer.name);
                    levels.push(*bytes);
                    tensors.insert(
                        layer.name.clone(),
                        reconstruct_layer(layer, &levels, interface)?,
                    );
                }
                buffers.push(step);
            }
            WeightStore::Incremental(state) => {
                let level = state.levels;

                // Check every slice before touching the running codes.
                let mut fresh = HashMap::new();
                for (layer, bytes) in slices {
                    match &layer.dtype {
                        LayerDType::Float32 => {
                            if !state.accumulators.contains_key(&layer.name) {
                                let acc = LevelAccumulator::new(
                                    interface.clone(),
                                    *layer.params()?,
                                    layer.numel()?,
                                )
                                .map_err(codec_err(layer))?;
                                fresh.insert(layer.name.clone(), acc);
                            }
                            if let Some(acc) = state
                                .accumulators
                                .get(&layer.name)
                                .or_else(|| fresh.get(&layer.name))
                            {
                                acc.check_level(bytes).map_err(codec_err(layer))?;
                            }
                        }
                        _ => {
                            let level0 = if level == 0 {
                                *bytes
                            } else {
                                state.raw.get(&layer.name).map(Vec::as_slice).unwrap_or(&[])
                            };
                            tensors.insert(
                                layer.name.clone(),
                                reconstruct_layer(layer, &[level0], interface)?,
                            );
                        }
                    }
                }

                state.accumulators.extend(fresh);
                for (layer, bytes) in slices {
                    if layer.dtype != LayerDType::Float32 {
                        if level == 0 {
                            state.raw.insert(layer.name.clone(), bytes.to_vec());
                        }
                        continue;
                    }
                    let Some(acc) = state.accumulators.get_mut(&layer.name) else {
                        continue;
                    };
                    acc.push_level(bytes).map_err(codec_err(layer))?;
                    let values = acc.values().map_err(codec_err(layer))?;
                    tensors.insert(layer.name.clone(), Tensor::from_f32(values, &layer.shape)?);
                }
                state.levels += 1;
            }
        }
        Ok(tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgnet_codec::encode;
    use serde_json::json;

    fn manifest_and_parts() -> (PartitionManifest, Vec<Vec<u8>>) {
        let data = [0.25f32, -1.0, 3.5, 0.0, 2.0, 1.5];
        let iface = BitWidthInterface::new(vec![4, 4, 8]).unwrap();
        let enc = encode(&data, &iface).unwrap();
        let ids: Vec<u8> = [7i32, -3].iter().flat_map(|v| v.to_le_bytes()).collect();

        let manifest = PartitionManifest::from_json(json!({
            "layers": [
                { "name": "w", "shape": [2, 3], "dtype": "float32",
                  "byteSizes": enc.byte_sizes(),
                  "quantization": { "scale": enc.params.scale, "min": enc.params.min } },
                { "name": "ids", "shape": [2], "dtype": "int32", "byteSizes": [8, 0, 0] }
            ],
            "files": ["part-0.bin", "part-1.bin", "part-2.bin"],
            "dividingInterface": [4, 4, 8]
        }))
        .unwrap();

        let parts = (0..3)
            .map(|k| {
                let mut p = enc.buffers[k].clone();
                if k == 0 {
                    p.extend_from_slice(&ids);
                }
                p
            })
            .collect();
        (manifest, parts)
    }

    fn run(mode: Reconstruction) -> Vec<NamedTensors> {
        let (manifest, parts) = manifest_and_parts();
        let mut store = WeightStore::new(mode);
        parts
            .iter()
            .enumerate()
            .map(|(k, part)| {
                let slices = manifest.split_partition(k, part).unwrap();
                store.apply(&manifest, &slices).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_redecode_and_incremental_agree() {
        let a = run(Reconstruction::Redecode);
        let b = run(Reconstruction::Incremental);
        assert_eq!(a.len(), 3);
        for (step, (x, y)) in a.iter().zip(&b).enumerate() {
            assert_eq!(x["w"], y["w"], "step {step}");
            assert_eq!(x["ids"].as_i32_slice().unwrap(), &[7, -3]);
            assert_eq!(y["ids"].as_i32_slice().unwrap(), &[7, -3]);
        }
        let last = a[2]["w"].as_f32_slice().unwrap();
        assert!((last[2] - 3.5).abs() < 1e-3);
    }

    #[test]
    fn test_rejected_step_leaves_incremental_state() {
        let (manifest, parts) = manifest_and_parts();
        let mut store = WeightStore::new(Reconstruction::Incremental);
        let first = manifest.split_partition(0, &parts[0]).unwrap();
        store.apply(&manifest, &first).unwrap();

        let mut slices = manifest.split_partition(1, &parts[1]).unwrap();
        slices[0].1 = &parts[1][..1];
        assert!(matches!(
            store.apply(&manifest, &slices),
            Err(LoadError::Codec { ref layer, .. }) if layer == "w"
        ));
        assert_eq!(store.levels(), 1);

        let slices = manifest.split_partition(1, &parts[1]).unwrap();
        let merged = store.apply(&manifest, &slices).unwrap();
        assert_eq!(merged["w"], run(Reconstruction::Redecode)[1]["w"]);
    }

    #[test]
    fn test_layer_levels() {
        let (manifest, parts) = manifest_and_parts();
        let mut store = WeightStore::new(Reconstruction::Redecode);
        for (k, part) in parts.iter().enumerate().take(2) {
            let slices = manifest.split_partition(k, part).unwrap();
            store.apply(&manifest, &slices).unwrap();
        }
        let WeightStore::Redecode(buffers) = &store else {
            panic!("expected redecode store");
        };
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers.layer_levels("w").len(), 2);
        assert_eq!(buffers.layer_levels("ids")[1].len(), 0);
        assert_eq!(store.levels(), 2);
    }
}
