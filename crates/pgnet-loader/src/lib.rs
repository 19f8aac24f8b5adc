//! # pgnet-loader
//!
//! Progressive model loading: fetch a quantized model one bit-width level
//! at a time and keep a runnable model refined after every level.
//!
//! - [`PartitionManifest`]: `progressive.json`, the per-layer byte layout
//! - [`ModelDescriptor`] / [`ModelHandle`]: `model.json` and the shells
//!   weights are injected into
//! - [`Fetch`]: HTTP, filesystem and in-memory collaborators
//! - [`ProgressiveLoader`]: init, step, and sequential or pipelined driving
//! - [`PartitionWriter`] and [`source`]: the producer side
//!
//! ```text
//! init: progressive.json + model.json → model shell
//! step k: part-k.bin → split by byteSizes[k] → accumulate → decode → inject → callback
//! ```

pub mod buffers;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod manifest;
pub mod model;
pub mod source;
pub mod writer;

pub use buffers::{reconstruct_layer, AccumulatedBuffers};
pub use config::{LoaderConfig, Reconstruction, SchedulingPolicy};
pub use descriptor::{ModelDescriptor, ModelFormat};
pub use driver::{StepCallback, StepFuture, StepInfo};
pub use error::{BoxError, ConvertError, FetchError, LoadError, ModelError};
pub use fetch::{AnyFetcher, Fetch, FsFetcher, HttpFetcher, MemoryFetcher};
pub use loader::{load_progressively, LoaderState, ProgressiveLoader};
pub use manifest::{LayerDType, LayerDescriptor, PartitionManifest, QuantizationParams};
pub use model::{GraphModel, LayersModel, ModelHandle};
pub use writer::{ConvertSummary, PartitionWriter};

pub type Result<T> = std::result::Result<T, LoadError>;
