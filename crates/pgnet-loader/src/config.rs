//! Configuration for progressive loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// How tensors are rebuilt after each partition lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconstruction {
    /// Keep every partition and decode the full prefix each step.
    #[default]
    Redecode,
    /// Merge each level into running per-element codes.
    Incremental,
}

/// Order of fetch, injection and callback across steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Fetch `k + 1` only after step `k`'s callback has finished.
    Sequential,
    /// Fetch `k + 1` while step `k` is reconstructed and reported.
    Pipelined,
}

/// Configuration for a [`ProgressiveLoader`](crate::loader::ProgressiveLoader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Base location holding `progressive.json`, `model.json` and the
    /// partition files. A trailing `/` is ignored.
    pub model_url: String,

    /// Stop after this many steps. `None` loads every level.
    pub num_progress_steps: Option<usize>,

    /// Overlap partition fetches with reconstruction and callbacks.
    pub concurrent_mode: bool,

    /// Report per-step reconstruction timings at `info` instead of `debug`.
    pub logging: bool,

    /// Partitions the background fetch task may hold ahead of the consumer.
    pub prefetch_depth: usize,

    pub reconstruction: Reconstruction,

    /// Inject midpoint weights during `init()` so the model is usable
    /// before the first partition arrives.
    pub prefill_weights: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            model_url: String::new(),
            num_progress_steps: None,
            concurrent_mode: true,
            logging: false,
            prefetch_depth: 2,
            reconstruction: Reconstruction::Redecode,
            prefill_weights: false,
        }
    }
}

impl LoaderConfig {
    pub fn new(model_url: impl Into<String>) -> Self {
        Self {
            model_url: model_url.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| LoadError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.model_url.trim_end_matches('/').is_empty() {
            return Err(LoadError::Config("model_url is empty".into()));
        }
        if self.prefetch_depth == 0 {
            return Err(LoadError::Config("prefetch_depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.num_progress_steps = Some(steps);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.concurrent_mode = false;
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = depth;
        self
    }

    pub fn with_reconstruction(mut self, mode: Reconstruction) -> Self {
        self.reconstruction = mode;
        self
    }

    pub fn with_prefill(mut self, prefill: bool) -> Self {
        self.prefill_weights = prefill;
        self
    }

    pub fn policy(&self) -> SchedulingPolicy {
        if self.concurrent_mode {
            SchedulingPolicy::Pipelined
        } else {
            SchedulingPolicy::Sequential
        }
    }

    /// `model_url` without its trailing slash.
    pub fn base_url(&self) -> &str {
        self.model_url.trim_end_matches('/')
    }

    /// Location of `file` under the model base.
    pub fn location(&self, file: &str) -> String {
        format!("{}/{}", self.base_url(), file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = LoaderConfig::new("https://host/models/mnist/");
        assert!(c.concurrent_mode);
        assert!(!c.logging);
        assert_eq!(c.prefetch_depth, 2);
        assert_eq!(c.policy(), SchedulingPolicy::Pipelined);
        assert_eq!(c.location("part-0.bin"), "https://host/models/mnist/part-0.bin");
        assert_eq!(c.sequential().policy(), SchedulingPolicy::Sequential);
    }

    #[test]
    fn test_json_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        std::fs::write(
            &path,
            r#"{ "model_url": "/srv/m", "num_progress_steps": 3, "reconstruction": "incremental" }"#,
        )
        .unwrap();
        let c = LoaderConfig::from_json_file(&path).unwrap();
        assert_eq!(c.num_progress_steps, Some(3));
        assert_eq!(c.reconstruction, Reconstruction::Incremental);
        assert!(c.concurrent_mode);
    }

    #[test]
    fn test_validate() {
        assert!(LoaderConfig::new("/").validate().is_err());
        assert!(LoaderConfig::new("m").with_prefetch_depth(0).validate().is_err());
        assert!(LoaderConfig::new("m").validate().is_ok());
    }
}
