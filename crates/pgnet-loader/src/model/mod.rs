//! Model shells the loader injects weights into.
//!
//! Both shells keep their weights in a name-keyed store that is replaced
//! in place at every progressive step; topology is fixed at construction.

mod graph;
mod layers;

pub use graph::GraphModel;
pub use layers::{Activation, LayersModel};

use pgnet_core::NamedTensors;

use crate::descriptor::{ModelDescriptor, ModelFormat};
use crate::error::{LoadError, ModelError};

/// A built model shell, selected by the descriptor's `format` tag.
#[derive(Debug, Clone)]
pub enum ModelHandle {
    Layers(LayersModel),
    Graph(GraphModel),
}

impl ModelHandle {
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Result<Self, LoadError> {
        let handle = match descriptor.model_format()? {
            ModelFormat::Layers => ModelHandle::Layers(LayersModel::from_topology(
                &descriptor.model_topology,
            )?),
            ModelFormat::Graph => ModelHandle::Graph(GraphModel::from_topology(
                &descriptor.model_topology,
                descriptor.user_defined_metadata.as_ref(),
            )?),
        };
        Ok(handle)
    }

    pub fn format(&self) -> ModelFormat {
        match self {
            ModelHandle::Layers(_) => ModelFormat::Layers,
            ModelHandle::Graph(_) => ModelFormat::Graph,
        }
    }

    /// Replace weights by name; weights not named keep their value.
    pub fn load_weights(&mut self, weights: NamedTensors) {
        match self {
            ModelHandle::Layers(m) => m.load_weights(weights),
            ModelHandle::Graph(m) => m.load_weights(weights),
        }
    }

    pub fn predict(&self, inputs: &NamedTensors) -> Result<NamedTensors, ModelError> {
        match self {
            ModelHandle::Layers(m) => m.predict(inputs),
            ModelHandle::Graph(m) => m.predict(inputs),
        }
    }

    pub fn weights(&self) -> &NamedTensors {
        match self {
            ModelHandle::Layers(m) => m.weights(),
            ModelHandle::Graph(m) => m.weights(),
        }
    }

    pub fn input_names(&self) -> Vec<String> {
        match self {
            ModelHandle::Layers(m) => vec![m.input_name().to_string()],
            ModelHandle::Graph(m) => m.input_names().to_vec(),
        }
    }

    pub fn output_names(&self) -> Vec<String> {
        match self {
            ModelHandle::Layers(m) => vec![m.output_name().to_string()],
            ModelHandle::Graph(m) => m.output_names().to_vec(),
        }
    }
}
