//! Server configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Directory whose subdirectories are converted models.
    pub root: PathBuf,
    /// Address to bind to.
    pub addr: String,
    /// Allow cross-origin requests (browser loaders on another origin).
    pub cors: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            addr: "0.0.0.0:8080".to_string(),
            cors: true,
        }
    }
}

impl ServeConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }
}
