use std::path::PathBuf;

use pgnet_codec::CodecError;
use pgnet_core::CoreError;

/// Boxed error returned by step callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from a [`Fetch`](crate::fetch::Fetch) collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid JSON in {location}: {source}")]
    Json {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{location} unavailable: {reason}")]
    Unavailable { location: String, reason: String },
}

/// Errors from building or running a model shell.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid model topology: {0}")]
    Topology(String),

    #[error("unsupported layer class '{class}' in layer '{layer}'")]
    UnsupportedLayer { layer: String, class: String },

    #[error("unsupported op '{op}' in node '{node}'")]
    UnsupportedOp { node: String, op: String },

    #[error("unsupported activation '{0}'")]
    UnsupportedActivation(String),

    #[error("weight '{0}' has not been loaded")]
    MissingWeight(String),

    #[error("input '{0}' was not supplied")]
    MissingInput(String),

    #[error("model takes {expected} input(s), got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("node '{node}' references unknown input '{input}'")]
    UnknownNode { node: String, input: String },

    #[error("graph contains a cycle through '{0}'")]
    Cycle(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors from the progressive loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to fetch {location}: {source}")]
    ManifestFetch {
        location: String,
        #[source]
        source: FetchError,
    },

    #[error("unknown model format '{0}', expected 'layers-model' or 'graph-model'")]
    UnknownModelFormat(String),

    #[error("layer '{layer}' has unsupported dtype '{dtype}'")]
    UnsupportedDtype { layer: String, dtype: String },

    #[error("loader is not initialized; call init() first")]
    NotInitialized,

    #[error("layer '{layer}' has a degenerate quantization range (scale={scale}, min={min})")]
    DegenerateQuantizationRange { layer: String, scale: f64, min: f64 },

    #[error("failed to fetch partition {step} from {location}: {source}")]
    PartitionFetch {
        step: usize,
        location: String,
        #[source]
        source: FetchError,
    },

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("partition {step} is {got} bytes, manifest expects {expected}")]
    PartitionSizeMismatch {
        step: usize,
        expected: usize,
        got: usize,
    },

    #[error("failed to reconstruct layer '{layer}': {source}")]
    Codec {
        layer: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("step {step} callback failed: {source}")]
    Callback {
        step: usize,
        #[source]
        source: BoxError,
    },

    #[error("partition fetch task stopped before step {0}")]
    FetchTaskStopped(usize),

    #[error("invalid loader config: {0}")]
    Config(String),
}

/// Errors from reading source models and writing partitions.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid source model: {0}")]
    InvalidSource(String),

    #[error("tensor '{name}' has unsupported dtype '{dtype}'")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("duplicate tensor name '{0}'")]
    DuplicateTensor(String),

    #[error("output directory {} is not empty (use --force to overwrite)", .0.display())]
    OutputNotEmpty(PathBuf),

    #[error("failed to encode '{name}': {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("safetensors error in {}: {message}", path.display())]
    Safetensors { path: PathBuf, message: String },
}
