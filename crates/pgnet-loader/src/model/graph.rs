//! GraphDef-style shell: a flat node list evaluated in topological order.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Deserialize;
use serde_json::Value;

use pgnet_core::{NamedTensors, Tensor};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Placeholder,
    Const,
    Identity,
    MatMul,
    BiasAdd,
    Add,
    Relu,
    Relu6,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Op {
    fn parse(node: &str, op: &str) -> Result<Self, ModelError> {
        Ok(match op {
            "Placeholder" => Op::Placeholder,
            "Const" => Op::Const,
            "Identity" => Op::Identity,
            "MatMul" => Op::MatMul,
            "BiasAdd" => Op::BiasAdd,
            "Add" | "AddV2" => Op::Add,
            "Relu" => Op::Relu,
            "Relu6" => Op::Relu6,
            "Sigmoid" => Op::Sigmoid,
            "Tanh" => Op::Tanh,
            "Softmax" => Op::Softmax,
            other => {
                return Err(ModelError::UnsupportedOp {
                    node: node.to_string(),
                    op: other.to_string(),
                })
            }
        })
    }

    fn arity(&self) -> usize {
        match self {
            Op::Placeholder | Op::Const => 0,
            Op::MatMul | Op::BiasAdd | Op::Add => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNode {
    name: String,
    op: String,
    #[serde(default)]
    input: Vec<String>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    op: Op,
    inputs: Vec<usize>,
}

/// Strip the `:N` output-slot suffix from a tensor reference.
fn node_name(reference: &str) -> &str {
    match reference.rsplit_once(':') {
        Some((name, slot)) if slot.chars().all(|c| c.is_ascii_digit()) => name,
        _ => reference,
    }
}

/// Executes `modelTopology.node` with `Const` nodes bound to loaded weights.
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: Vec<Node>,
    /// Node indices in dependency order.
    order: Vec<usize>,
    index: HashMap<String, usize>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    weights: NamedTensors,
}

impl GraphModel {
    pub fn from_topology(topology: &Value, metadata: Option<&Value>) -> Result<Self, ModelError> {
        let raw: Vec<RawNode> = match topology.get("node") {
            Some(nodes) => serde_json::from_value(nodes.clone())
                .map_err(|e| ModelError::Topology(format!("invalid node list: {e}")))?,
            None => Vec::new(),
        };

        let mut index = HashMap::with_capacity(raw.len());
        for (i, node) in raw.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(ModelError::Topology(format!("duplicate node '{}'", node.name)));
            }
        }

        let mut nodes = Vec::with_capacity(raw.len());
        for node in &raw {
            let op = Op::parse(&node.name, &node.op)?;
            let inputs = node
                .input
                .iter()
                .filter(|r| !r.starts_with('^'))
                .map(|r| {
                    index.get(node_name(r)).copied().ok_or_else(|| ModelError::UnknownNode {
                        node: node.name.clone(),
                        input: r.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if inputs.len() != op.arity() {
                return Err(ModelError::Topology(format!(
                    "node '{}' ({:?}) expects {} inputs, got {}",
                    node.name,
                    op,
                    op.arity(),
                    inputs.len()
                )));
            }
            nodes.push(Node {
                name: node.name.clone(),
                op,
                inputs,
            });
        }

        let order = topological_order(&nodes)?;
        let inputs = nodes
            .iter()
            .filter(|n| n.op == Op::Placeholder)
            .map(|n| n.name.clone())
            .collect();
        let outputs = match signature_outputs(metadata) {
            Some(outputs) => {
                for name in &outputs {
                    if !index.contains_key(name) {
                        return Err(ModelError::UnknownNode {
                            node: "signature".into(),
                            input: name.clone(),
                        });
                    }
                }
                outputs
            }
            None => terminal_nodes(&nodes),
        };

        Ok(Self {
            nodes,
            order,
            index,
            inputs,
            outputs,
            weights: NamedTensors::new(),
        })
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn weights(&self) -> &NamedTensors {
        &self.weights
    }

    pub fn load_weights(&mut self, weights: NamedTensors) {
        self.weights.extend(weights);
    }

    /// Evaluate the output nodes. Input keys may carry a `:0` suffix.
    pub fn predict(&self, inputs: &NamedTensors) -> Result<NamedTensors, ModelError> {
        let feeds: HashMap<&str, &Tensor> =
            inputs.iter().map(|(k, v)| (node_name(k), v)).collect();

        let needed = self.ancestors_of_outputs();
        let mut values: Vec<Option<Tensor>> = vec![None; self.nodes.len()];

        for &i in &self.order {
            if !needed.contains(&i) {
                continue;
            }
            let node = &self.nodes[i];
            let arg = |k: usize| evaluated(&values, node, k);
            let out = match node.op {
                Op::Placeholder => feeds
                    .get(node.name.as_str())
                    .map(|t| (*t).clone())
                    .ok_or_else(|| ModelError::MissingInput(node.name.clone()))?,
                Op::Const => self
                    .weights
                    .get(&node.name)
                    .cloned()
                    .ok_or_else(|| ModelError::MissingWeight(node.name.clone()))?,
                Op::Identity => arg(0)?.clone(),
                Op::MatMul => arg(0)?.matmul(arg(1)?)?,
                Op::BiasAdd => arg(0)?.bias_add(arg(1)?)?,
                Op::Add => arg(0)?.add(arg(1)?)?,
                Op::Relu => arg(0)?.relu()?,
                Op::Relu6 => arg(0)?.relu6()?,
                Op::Sigmoid => arg(0)?.sigmoid()?,
                Op::Tanh => arg(0)?.tanh()?,
                Op::Softmax => arg(0)?.softmax()?,
            };
            values[i] = Some(out);
        }

        let mut out = NamedTensors::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let i = self.index[name];
            if let Some(t) = values[i].take() {
                out.insert(name.clone(), t);
            }
        }
        Ok(out)
    }

    fn ancestors_of_outputs(&self) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = self.outputs.iter().map(|n| self.index[n]).collect();
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(&self.nodes[i].inputs);
            }
        }
        seen
    }
}

fn evaluated<'v>(values: &'v [Option<Tensor>], node: &Node, k: usize) -> Result<&'v Tensor, ModelError> {
    values[node.inputs[k]]
        .as_ref()
        .ok_or_else(|| ModelError::Topology(format!("'{}' evaluated out of order", node.name)))
}

fn topological_order(nodes: &[Node]) -> Result<Vec<usize>, ModelError> {
    let mut indegree: Vec<usize> = nodes.iter().map(|n| n.inputs.len()).collect();
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for &src in &node.inputs {
            consumers[src].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &c in &consumers[i] {
            indegree[c] -= 1;
            if indegree[c] == 0 {
                ready.push_back(c);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .find(|&i| indegree[i] > 0)
            .map(|i| nodes[i].name.clone())
            .unwrap_or_default();
        return Err(ModelError::Cycle(stuck));
    }
    Ok(order)
}

/// Nodes no other node consumes, in declaration order.
fn terminal_nodes(nodes: &[Node]) -> Vec<String> {
    let consumed: HashSet<usize> = nodes.iter().flat_map(|n| n.inputs.iter().copied()).collect();
    nodes
        .iter()
        .enumerate()
        .filter(|(i, n)| !consumed.contains(i) && n.op != Op::Const)
        .map(|(_, n)| n.name.clone())
        .collect()
}

/// `userDefinedMetadata.signature.outputs.*.name`, sorted by signature key.
fn signature_outputs(metadata: Option<&Value>) -> Option<Vec<String>> {
    let outputs = metadata?.get("signature")?.get("outputs")?.as_object()?;
    let names: Vec<String> = outputs
        .values()
        .filter_map(|o| o.get("name").and_then(Value::as_str))
        .map(|n| node_name(n).to_string())
        .collect();
    (!names.is_empty()).then_some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mlp() -> Value {
        json!({ "node": [
            { "name": "x", "op": "Placeholder" },
            { "name": "w", "op": "Const" },
            { "name": "b", "op": "Const" },
            { "name": "mm", "op": "MatMul", "input": ["x", "w:0"] },
            { "name": "ba", "op": "BiasAdd", "input": ["mm", "b"] },
            { "name": "act", "op": "Relu", "input": ["ba", "^x"] },
            { "name": "Identity", "op": "Identity", "input": ["act"] }
        ]})
    }

    fn weights() -> NamedTensors {
        let mut w = NamedTensors::new();
        w.insert("w".into(), Tensor::from_f32(vec![1.0, -1.0, 2.0, 0.5], &[2, 2]).unwrap());
        w.insert("b".into(), Tensor::from_f32(vec![0.5, -5.0], &[2]).unwrap());
        w
    }

    #[test]
    fn test_evaluates_terminal_outputs() {
        let mut g = GraphModel::from_topology(&mlp(), None).unwrap();
        assert_eq!(g.input_names(), &["x".to_string()]);
        assert_eq!(g.output_names(), &["Identity".to_string()]);
        g.load_weights(weights());

        let mut inputs = NamedTensors::new();
        inputs.insert("x:0".into(), Tensor::from_f32(vec![1.0, 1.0], &[1, 2]).unwrap());
        let out = g.predict(&inputs).unwrap();
        // [1, 1] @ w = [3, -0.5]; + b = [3.5, -5.5]; relu → [3.5, 0]
        assert_eq!(out["Identity"].as_f32_slice().unwrap(), &[3.5, 0.0]);
    }

    #[test]
    fn test_signature_outputs() {
        let meta = json!({ "signature": { "outputs": { "logits": { "name": "ba:0" } } } });
        let g = GraphModel::from_topology(&mlp(), Some(&meta)).unwrap();
        assert_eq!(g.output_names(), &["ba".to_string()]);
    }

    #[test]
    fn test_missing_input_and_weight() {
        let mut g = GraphModel::from_topology(&mlp(), None).unwrap();
        assert!(matches!(
            g.predict(&NamedTensors::new()),
            Err(ModelError::MissingInput(n)) if n == "x"
        ));
        let mut inputs = NamedTensors::new();
        inputs.insert("x".into(), Tensor::zeros(&[1, 2], pgnet_core::DType::F32));
        assert!(matches!(g.predict(&inputs), Err(ModelError::MissingWeight(_))));
        g.load_weights(weights());
        assert!(g.predict(&inputs).is_ok());
    }

    #[test]
    fn test_rejects_bad_graphs() {
        let unsupported = json!({ "node": [ { "name": "c", "op": "Conv2D", "input": [] } ] });
        assert!(matches!(
            GraphModel::from_topology(&unsupported, None),
            Err(ModelError::UnsupportedOp { .. })
        ));

        let dangling = json!({ "node": [ { "name": "r", "op": "Relu", "input": ["nope"] } ] });
        assert!(matches!(
            GraphModel::from_topology(&dangling, None),
            Err(ModelError::UnknownNode { .. })
        ));

        let cycle = json!({ "node": [
            { "name": "a", "op": "Relu", "input": ["b"] },
            { "name": "b", "op": "Relu", "input": ["a"] }
        ]});
        assert!(matches!(GraphModel::from_topology(&cycle, None), Err(ModelError::Cycle(_))));
    }
}
