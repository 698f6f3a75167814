// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph exchange format.
//!
//! A network is written as a self-contained JSON document in which every
//! value carries a numeric id. [`NetworkParser`] replays a document through
//! the ordinary layer constructors of a target [`NetworkDefinition`], so
//! a parsed network is validated exactly like one built by hand.

use crate::network::{LayerKind, NetworkDefinition, TensorRef};
use crate::types::{DataType, TensorLocation};
use crate::NetworkError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tensor_core::Shape;

const FORMAT: &str = "network-ir.exchange";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: String,
    version: u32,
    name: String,
    inputs: Vec<Value>,
    nodes: Vec<Node>,
    outputs: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Value {
    id: usize,
    name: String,
    dtype: DataType,
    shape: Shape,
    location: TensorLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dynamic_range: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Node {
    name: String,
    op: LayerKind,
    inputs: Vec<usize>,
    output: Value,
}

/// Writes `network` as an exchange document.
pub fn export(network: &NetworkDefinition) -> Result<Vec<u8>, NetworkError> {
    let value = |t: TensorRef| -> Result<Value, NetworkError> {
        let tensor = network.tensor(t)?;
        Ok(Value {
            id: t.index(),
            name: tensor.name.clone(),
            dtype: tensor.dtype,
            shape: tensor.shape.clone(),
            location: tensor.location,
            dynamic_range: tensor.dynamic_range,
        })
    };
    let doc = Document {
        format: FORMAT.to_string(),
        version: VERSION,
        name: network.name().to_string(),
        inputs: network.inputs().iter().map(|&t| value(t)).collect::<Result<_, _>>()?,
        nodes: network
            .layers()
            .iter()
            .map(|layer| {
                Ok(Node {
                    name: layer.name.clone(),
                    op: layer.kind.clone(),
                    inputs: layer.inputs.iter().map(|t| t.index()).collect(),
                    output: value(layer.output)?,
                })
            })
            .collect::<Result<_, NetworkError>>()?,
        outputs: network.outputs().iter().map(|t| t.index()).collect(),
    };
    serde_json::to_vec_pretty(&doc).map_err(|e| NetworkError::Exchange(e.to_string()))
}

/// Populates a network from an exchange document.
pub struct NetworkParser<'a> {
    network: &'a mut NetworkDefinition,
}

impl<'a> NetworkParser<'a> {
    pub fn new(network: &'a mut NetworkDefinition) -> Self {
        Self { network }
    }

    /// Parses `bytes` and appends its inputs, layers and outputs.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<(), NetworkError> {
        let doc: Document = serde_json::from_slice(bytes).map_err(|e| NetworkError::Exchange(e.to_string()))?;
        if doc.format != FORMAT || doc.version != VERSION {
            return Err(NetworkError::Exchange(format!(
                "unsupported document {} v{}",
                doc.format, doc.version
            )));
        }
        if self.network.name().is_empty() {
            self.network.set_name(doc.name.clone());
        }

        let mut ids: HashMap<usize, TensorRef> = HashMap::new();
        for input in &doc.inputs {
            let t = self.network.add_input(&input.name, input.dtype, input.shape.clone())?;
            self.apply_attributes(t, input)?;
            ids.insert(input.id, t);
        }

        for node in doc.nodes {
            let arg = |i: usize| -> Result<TensorRef, NetworkError> {
                let id = *node
                    .inputs
                    .get(i)
                    .ok_or_else(|| NetworkError::Exchange(format!("node '{}' is missing input {i}", node.name)))?;
                ids.get(&id)
                    .copied()
                    .ok_or_else(|| NetworkError::Exchange(format!("node '{}' uses undefined value {id}", node.name)))
            };
            let net = &mut *self.network;
            let layer = match node.op.clone() {
                LayerKind::Constant { shape, weights } => net.add_constant(shape, weights)?,
                LayerKind::Shuffle {
                    first_transpose,
                    reshape,
                } => net.add_shuffle(arg(0)?, first_transpose, reshape)?,
                LayerKind::ElementWise { op } => net.add_elementwise(arg(0)?, arg(1)?, op)?,
                LayerKind::Activation { activation } => net.add_activation(arg(0)?, activation)?,
                LayerKind::Unary { op } => net.add_unary(arg(0)?, op)?,
                LayerKind::MatrixMultiply => net.add_matrix_multiply(arg(0)?, arg(1)?)?,
                LayerKind::SoftMax { axes } => net.add_softmax(arg(0)?, axes)?,
                LayerKind::Reduce { op, axes, keep_dims } => net.add_reduce(arg(0)?, op, axes, keep_dims)?,
                LayerKind::Normalization { axes, epsilon } => {
                    net.add_normalization(arg(0)?, arg(1)?, arg(2)?, axes, epsilon)?
                }
                LayerKind::Identity => net.add_identity(arg(0)?)?,
            };
            let declared = &self.network.tensor(layer.output)?.shape;
            if declared != &node.output.shape {
                return Err(NetworkError::Exchange(format!(
                    "node '{}' declares output {} but computes {declared}",
                    node.name, node.output.shape
                )));
            }
            self.network.set_layer_name(layer.index, node.name.clone());
            self.apply_attributes(layer.output, &node.output)?;
            ids.insert(node.output.id, layer.output);
        }

        for id in doc.outputs {
            let t = *ids
                .get(&id)
                .ok_or_else(|| NetworkError::Exchange(format!("output refers to undefined value {id}")))?;
            self.network.mark_output(t)?;
        }
        tracing::debug!(layers = self.network.num_layers(), "exchange document parsed");
        Ok(())
    }

    fn apply_attributes(&mut self, t: TensorRef, value: &Value) -> Result<(), NetworkError> {
        self.network.set_tensor_name(t, value.name.clone())?;
        self.network.set_tensor_dtype(t, value.dtype)?;
        self.network.set_tensor_location(t, value.location)?;
        if let Some(range) = value.dynamic_range {
            self.network.set_dynamic_range(t, range)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationType, ElementWiseOp, Weights};

    fn sample() -> NetworkDefinition {
        let mut net = NetworkDefinition::new();
        net.set_name("sample");
        let x = net.add_input("x", DataType::Float, Shape::matrix(2, 3)).unwrap();
        let c = net
            .add_constant(
                Shape::new(vec![1, 3]),
                Weights {
                    dtype: DataType::Float,
                    values: vec![1.0, 2.0, 3.0],
                },
            )
            .unwrap();
        let s = net.add_elementwise(x, c.output, ElementWiseOp::Prod).unwrap();
        let y = net.add_activation(s.output, ActivationType::Tanh).unwrap();
        net.set_layer_name(y.index, "act");
        net.set_tensor_name(y.output, "y").unwrap();
        net.set_dynamic_range(y.output, 1.0).unwrap();
        net.mark_output(y.output).unwrap();
        net
    }

    #[test]
    fn test_parse_reproduces_network() {
        let original = sample();
        let bytes = export(&original).unwrap();
        let mut parsed = NetworkDefinition::new();
        NetworkParser::new(&mut parsed).parse(&bytes).unwrap();

        assert_eq!(parsed.name(), "sample");
        assert_eq!(parsed.num_layers(), original.num_layers());
        assert_eq!(parsed.layers()[2].name, "act");
        let out = parsed.tensor(parsed.outputs()[0]).unwrap();
        assert_eq!(out.name, "y");
        assert_eq!(out.dynamic_range, Some(1.0));
        assert_eq!(parsed.count_layers("CONSTANT"), 1);
    }

    #[test]
    fn test_rejects_undefined_value() {
        let bytes = export(&sample()).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        doc["outputs"] = serde_json::json!([99]);
        let mut parsed = NetworkDefinition::new();
        let err = NetworkParser::new(&mut parsed)
            .parse(&serde_json::to_vec(&doc).unwrap())
            .unwrap_err();
        assert!(matches!(err, NetworkError::Exchange(_)));
    }

    #[test]
    fn test_rejects_foreign_document() {
        let mut parsed = NetworkDefinition::new();
        assert!(NetworkParser::new(&mut parsed).parse(b"{\"format\": \"x\"}").is_err());
    }
}
