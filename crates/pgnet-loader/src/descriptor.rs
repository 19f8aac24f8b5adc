//! `model.json`: the model shell description that accompanies the partitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::LoadError;

/// Parsed `model.json`.
///
/// `weightsManifest` is read (the converter needs it to find source shards)
/// but never written back; progressive models carry their weights in the
/// partition files instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(rename = "modelTopology", default)]
    pub model_topology: Value,

    #[serde(
        rename = "userDefinedMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_defined_metadata: Option<Value>,

    #[serde(rename = "weightsManifest", default, skip_serializing)]
    pub weights_manifest: Option<Value>,

    /// Everything else (`generatedBy`, `convertedBy`, ...), passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelDescriptor {
    pub fn from_json(value: Value) -> Result<Self, LoadError> {
        serde_json::from_value(value)
            .map_err(|e| LoadError::MalformedManifest(format!("model.json: {e}")))
    }

    pub fn model_format(&self) -> Result<ModelFormat, LoadError> {
        ModelFormat::resolve(self.format.as_deref())
    }
}

/// Which model shell a descriptor builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Layers,
    Graph,
}

impl ModelFormat {
    pub const LAYERS_TAG: &'static str = "layers-model";
    pub const GRAPH_TAG: &'static str = "graph-model";

    /// Map the descriptor's `format` tag to a shell.
    ///
    /// An absent tag falls back to the graph shell with a warning.
    pub fn resolve(tag: Option<&str>) -> Result<Self, LoadError> {
        match tag {
            Some(Self::LAYERS_TAG) => Ok(ModelFormat::Layers),
            Some(Self::GRAPH_TAG) => Ok(ModelFormat::Graph),
            None => {
                warn!("model.json has no `format` field; loading as a graph model, which may not work");
                Ok(ModelFormat::Graph)
            }
            Some(other) => Err(LoadError::UnknownModelFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Layers => Self::LAYERS_TAG,
            ModelFormat::Graph => Self::GRAPH_TAG,
        }
    }
}
