//! Shared application state: the model root and a manifest cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use pgnet_loader::loader::{MANIFEST_FILE, MODEL_FILE};
use pgnet_loader::{ModelDescriptor, PartitionManifest};

use crate::api::{ApiError, ModelSummary};

/// Shared state for the model host.
#[derive(Clone)]
pub struct AppState {
    root: Arc<PathBuf>,
    /// Summaries keyed by model name, valid while `progressive.json` is unchanged.
    cache: Arc<Mutex<HashMap<String, (SystemTime, ModelSummary)>>>,
}

impl AppState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every subdirectory holding a `progressive.json`, sorted.
    pub fn model_names(&self) -> Result<Vec<String>, ApiError> {
        let entries = std::fs::read_dir(self.root()).map_err(|source| ApiError::Io {
            path: self.root().to_path_buf(),
            source,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(MANIFEST_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Summary of one model, read from disk unless cached and unchanged.
    pub fn summary(&self, name: &str) -> Result<ModelSummary, ApiError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(ApiError::NotFound(name.to_string()));
        }
        let dir = self.root().join(name);
        let manifest_path = dir.join(MANIFEST_FILE);
        let modified = std::fs::metadata(&manifest_path)
            .and_then(|m| m.modified())
            .map_err(|_| ApiError::NotFound(name.to_string()))?;

        if let Some((stamp, summary)) = self.cache.lock().get(name) {
            if *stamp == modified {
                return Ok(summary.clone());
            }
        }

        let summary = read_summary(name, &dir)?;
        tracing::debug!("Cached layout of model '{}'", name);
        self.cache
            .lock()
            .insert(name.to_string(), (modified, summary.clone()));
        Ok(summary)
    }
}

fn read_summary(name: &str, dir: &Path) -> Result<ModelSummary, ApiError> {
    let read = |file: &str| {
        let path = dir.join(file);
        std::fs::read(&path).map_err(|source| ApiError::Io { path, source })
    };

    let manifest = PartitionManifest::from_slice(&read(MANIFEST_FILE)?)
        .map_err(|e| ApiError::InvalidModel(name.to_string(), e.to_string()))?;

    let format = match read(MODEL_FILE) {
        Ok(bytes) => serde_json::from_slice::<ModelDescriptor>(&bytes)
            .ok()
            .and_then(|d| d.model_format().ok())
            .map(|f| f.as_str().to_string()),
        Err(_) => None,
    };

    Ok(ModelSummary {
        name: name.to_string(),
        format,
        interface: manifest.interface().levels().to_vec(),
        layers: manifest.layers.len(),
        files: manifest.files.clone(),
        step_bytes: (0..manifest.num_levels()).map(|k| manifest.step_len(k)).collect(),
        total_bytes: manifest.total_bytes(),
    })
}
