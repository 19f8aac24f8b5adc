//! Keras-style `Sequential` shell.

use serde_json::Value;

use pgnet_core::{NamedTensors, Tensor};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Relu6,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    pub fn parse(name: &str) -> Result<Self, ModelError> {
        match name {
            "linear" | "" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "relu6" => Ok(Activation::Relu6),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "softmax" => Ok(Activation::Softmax),
            other => Err(ModelError::UnsupportedActivation(other.to_string())),
        }
    }

    pub fn apply(&self, x: Tensor) -> Result<Tensor, ModelError> {
        let y = match self {
            Activation::Linear => return Ok(x),
            Activation::Relu => x.relu()?,
            Activation::Relu6 => x.relu6()?,
            Activation::Sigmoid => x.sigmoid()?,
            Activation::Tanh => x.tanh()?,
            Activation::Softmax => x.softmax()?,
        };
        Ok(y)
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Dense {
        name: String,
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
    Activation {
        activation: Activation,
    },
    Flatten,
    /// Identity at inference.
    Dropout,
}

/// A linear stack of layers whose weights are named `<layer>/kernel`
/// and `<layer>/bias`.
#[derive(Debug, Clone)]
pub struct LayersModel {
    input_name: String,
    output_name: String,
    layers: Vec<Layer>,
    weights: NamedTensors,
}

impl LayersModel {
    /// Build from `modelTopology`, which may wrap the model in `model_config`.
    pub fn from_topology(topology: &Value) -> Result<Self, ModelError> {
        let topology = topology.get("model_config").unwrap_or(topology);

        let class = topology.get("class_name").and_then(Value::as_str).unwrap_or("");
        if class != "Sequential" {
            return Err(ModelError::Topology(format!(
                "only Sequential models are supported, got '{class}'"
            )));
        }

        let config = topology.get("config").unwrap_or(&Value::Null);
        let layer_configs = config
            .as_array()
            .or_else(|| config.get("layers").and_then(Value::as_array))
            .ok_or_else(|| ModelError::Topology("Sequential config has no layers".into()))?;

        let mut input_name = None;
        let mut output_name = None;
        let mut layers = Vec::with_capacity(layer_configs.len());

        for (i, entry) in layer_configs.iter().enumerate() {
            let class = entry.get("class_name").and_then(Value::as_str).unwrap_or("");
            let cfg = entry.get("config").unwrap_or(&Value::Null);
            let name = cfg
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{i}", class.to_lowercase()));

            if input_name.is_none() {
                input_name = Some(if class == "InputLayer" {
                    name.clone()
                } else {
                    format!("{name}_input")
                });
            }

            let layer = match class {
                "InputLayer" => continue,
                "Dense" => Layer::Dense {
                    units: cfg.get("units").and_then(Value::as_u64).ok_or_else(|| {
                        ModelError::Topology(format!("Dense layer '{name}' has no units"))
                    })? as usize,
                    activation: parse_activation(cfg)?,
                    use_bias: cfg.get("use_bias").and_then(Value::as_bool).unwrap_or(true),
                    name: name.clone(),
                },
                "Activation" => Layer::Activation {
                    activation: parse_activation(cfg)?,
                },
                "Flatten" => Layer::Flatten,
                "Dropout" => Layer::Dropout,
                other => {
                    return Err(ModelError::UnsupportedLayer {
                        layer: name,
                        class: other.to_string(),
                    })
                }
            };
            output_name = Some(name);
            layers.push(layer);
        }

        let output_name =
            output_name.ok_or_else(|| ModelError::Topology("model has no layers".into()))?;
        Ok(Self {
            input_name: input_name.unwrap_or_else(|| "input".into()),
            output_name,
            layers,
            weights: NamedTensors::new(),
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn weights(&self) -> &NamedTensors {
        &self.weights
    }

    /// Names of every weight the topology reads.
    pub fn weight_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|l| match l {
                Layer::Dense { name, use_bias, .. } => {
                    let mut v = vec![format!("{name}/kernel")];
                    if *use_bias {
                        v.push(format!("{name}/bias"));
                    }
                    v
                }
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn load_weights(&mut self, weights: NamedTensors) {
        self.weights.extend(weights);
    }

    /// Run the stack on the single input tensor.
    pub fn predict(&self, inputs: &NamedTensors) -> Result<NamedTensors, ModelError> {
        let input = match inputs.get(&self.input_name) {
            Some(t) => t,
            None if inputs.len() == 1 => inputs.values().next().ok_or(ModelError::InputCount {
                expected: 1,
                got: 0,
            })?,
            None => {
                return Err(ModelError::InputCount {
                    expected: 1,
                    got: inputs.len(),
                })
            }
        };

        let mut x = input.clone();
        for layer in &self.layers {
            x = match layer {
                Layer::Dense {
                    name,
                    units,
                    activation,
                    use_bias,
                } => {
                    let y = self.dense(&x, name, *units, *use_bias)?;
                    activation.apply(y)?
                }
                Layer::Activation { activation } => activation.apply(x)?,
                Layer::Flatten => x.flatten()?,
                Layer::Dropout => x,
            };
        }

        let mut out = NamedTensors::with_capacity(1);
        out.insert(self.output_name.clone(), x);
        Ok(out)
    }

    fn dense(&self, x: &Tensor, name: &str, units: usize, use_bias: bool) -> Result<Tensor, ModelError> {
        let kernel = self.weight(&format!("{name}/kernel"))?;
        let in_dim = x.shape().last_dim();
        let mut out_dims = x.shape().dims().to_vec();
        if let Some(last) = out_dims.last_mut() {
            *last = units;
        }

        let mut y = x.reshape(&[-1, in_dim as isize])?.matmul(kernel)?;
        if use_bias {
            y = y.bias_add(self.weight(&format!("{name}/bias"))?)?;
        }
        let out_dims: Vec<isize> = out_dims.iter().map(|&d| d as isize).collect();
        Ok(y.reshape(&out_dims)?)
    }

    fn weight(&self, name: &str) -> Result<&Tensor, ModelError> {
        self.weights
            .get(name)
            .ok_or_else(|| ModelError::MissingWeight(name.to_string()))
    }
}

fn parse_activation(cfg: &Value) -> Result<Activation, ModelError> {
    Activation::parse(cfg.get("activation").and_then(Value::as_str).unwrap_or("linear"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topology() -> Value {
        json!({
            "model_config": {
                "class_name": "Sequential",
                "config": { "name": "mlp", "layers": [
                    { "class_name": "Flatten", "config": { "name": "flat", "batch_input_shape": [null, 2, 2] } },
                    { "class_name": "Dense", "config": { "name": "hidden", "units": 2, "activation": "relu" } },
                    { "class_name": "Dropout", "config": { "name": "drop", "rate": 0.5 } },
                    { "class_name": "Dense", "config": { "name": "out", "units": 2, "use_bias": false } },
                    { "class_name": "Activation", "config": { "name": "probs", "activation": "softmax" } }
                ]}
            }
        })
    }

    fn weights() -> NamedTensors {
        let mut w = NamedTensors::new();
        w.insert(
            "hidden/kernel".into(),
            Tensor::from_f32(vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0], &[4, 2]).unwrap(),
        );
        w.insert("hidden/bias".into(), Tensor::from_f32(vec![0.0, -10.0], &[2]).unwrap());
        w.insert(
            "out/kernel".into(),
            Tensor::from_f32(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]).unwrap(),
        );
        w
    }

    #[test]
    fn test_sequential_forward() {
        let mut m = LayersModel::from_topology(&topology()).unwrap();
        assert_eq!(m.input_name(), "flat_input");
        assert_eq!(m.output_name(), "probs");
        assert_eq!(
            m.weight_names(),
            vec!["hidden/kernel", "hidden/bias", "out/kernel"]
        );
        m.load_weights(weights());

        let mut inputs = NamedTensors::new();
        inputs.insert(
            "x".into(),
            Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2]).unwrap(),
        );
        let out = m.predict(&inputs).unwrap();
        let probs = out["probs"].as_f32_slice().unwrap();
        // hidden = relu([4, 6] + [0, -10]) = [4, 0]
        assert!(probs[0] > 0.98);
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_weight() {
        let m = LayersModel::from_topology(&topology()).unwrap();
        let mut inputs = NamedTensors::new();
        inputs.insert("x".into(), Tensor::zeros(&[1, 4], pgnet_core::DType::F32));
        assert!(matches!(m.predict(&inputs), Err(ModelError::MissingWeight(w)) if w == "hidden/kernel"));
    }

    #[test]
    fn test_rejects_unknown_layer() {
        let t = json!({ "class_name": "Sequential", "config": [
            { "class_name": "Conv2D", "config": { "name": "c" } }
        ]});
        assert!(matches!(
            LayersModel::from_topology(&t),
            Err(ModelError::UnsupportedLayer { class, .. }) if class == "Conv2D"
        ));
        let t = json!({ "class_name": "Model", "config": {} });
        assert!(matches!(LayersModel::from_topology(&t), Err(ModelError::Topology(_))));
    }
}
