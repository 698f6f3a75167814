// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built engines and their bindings.
//!
//! An [`Engine`] is the immutable product of [`crate::Builder::build_engine`]:
//! the live layers of a network in execution order, the binding table
//! (inputs first, then outputs, each with its per-item shape), and the
//! precision decisions made at build time. It serializes to an opaque byte
//! blob and back without loss.

use crate::network::{Layer, NetworkTensor, TensorRef};
use crate::types::{DataType, TensorLocation};
use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tensor_core::Shape;

/// Leading bytes of every serialized engine.
const ENGINE_MAGIC: &[u8; 8] = b"NIRENG01";

/// A named slot bound to a buffer at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub tensor: TensorRef,
    pub is_input: bool,
    /// Per-item shape; the bound buffer holds `batch_size` of these.
    pub shape: Shape,
    pub dtype: DataType,
    pub location: TensorLocation,
}

impl Binding {
    /// Bytes needed for `batch_size` items.
    pub fn size_bytes(&self, batch_size: usize) -> usize {
        batch_size * self.shape.size_bytes(self.dtype.storage())
    }
}

/// Reduced-precision modes an engine was built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub fp16: bool,
    pub int8: bool,
    pub strict_types: bool,
}

/// A compiled, batch-parametric network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub(crate) name: String,
    pub(crate) tensors: Vec<NetworkTensor>,
    pub(crate) layers: Vec<Layer>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) max_batch_size: usize,
    pub(crate) precision: Precision,
    /// Tensor index → symmetric INT8 range.
    pub(crate) dynamic_ranges: BTreeMap<usize, f32>,
}

impl Engine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn num_bindings(&self) -> usize {
        self.bindings.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.bindings.iter().filter(|b| b.is_input).count()
    }

    pub fn num_outputs(&self) -> usize {
        self.bindings.iter().filter(|b| !b.is_input).count()
    }

    /// Slot index of the binding named `name`.
    pub fn binding_index(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name == name)
    }

    pub fn binding(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    pub fn binding_is_input(&self, index: usize) -> Option<bool> {
        self.binding(index).map(|b| b.is_input)
    }

    pub fn binding_shape(&self, index: usize) -> Option<&Shape> {
        self.binding(index).map(|b| &b.shape)
    }

    pub fn binding_dtype(&self, index: usize) -> Option<DataType> {
        self.binding(index).map(|b| b.dtype)
    }

    pub fn binding_location(&self, index: usize) -> Option<TensorLocation> {
        self.binding(index).map(|b| b.location)
    }

    /// INT8 range assigned to the named tensor, if any.
    pub fn dynamic_range(&self, tensor_name: &str) -> Option<f32> {
        let index = self.tensors.iter().position(|t| t.name == tensor_name)?;
        self.dynamic_ranges.get(&index).copied()
    }

    /// Serializes the engine to an opaque byte blob.
    pub fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        let body = serde_json::to_vec(self).map_err(|e| EngineError::InvalidEngine(e.to_string()))?;
        let mut bytes = Vec::with_capacity(ENGINE_MAGIC.len() + body.len());
        bytes.extend_from_slice(ENGINE_MAGIC);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Reconstructs an engine from [`Engine::serialize`] output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, EngineError> {
        let body = bytes
            .strip_prefix(ENGINE_MAGIC.as_slice())
            .ok_or_else(|| EngineError::InvalidEngine("missing engine header".into()))?;
        let engine: Engine =
            serde_json::from_slice(body).map_err(|e| EngineError::InvalidEngine(e.to_string()))?;
        if engine.bindings.iter().any(|b| b.tensor.index() >= engine.tensors.len()) {
            return Err(EngineError::InvalidEngine("binding refers to unknown tensor".into()));
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationType, Builder, BuilderConfig, NetworkDefinition};

    fn relu_engine() -> Engine {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, Shape::vector(3)).unwrap();
        let y = net.add_activation(x, ActivationType::Relu).unwrap();
        net.set_tensor_name(y.output, "y").unwrap();
        net.mark_output(y.output).unwrap();
        Builder::default()
            .build_engine(&net, &mut BuilderConfig::default())
            .unwrap()
    }

    #[test]
    fn test_binding_queries() {
        let engine = relu_engine();
        assert_eq!(engine.num_bindings(), 2);
        assert_eq!(engine.num_inputs(), 1);
        assert_eq!(engine.num_outputs(), 1);
        assert_eq!(engine.binding_index("y"), Some(1));
        assert_eq!(engine.binding_is_input(0), Some(true));
        assert_eq!(engine.binding_shape(1), Some(&Shape::vector(3)));
        assert_eq!(engine.binding_location(1), Some(TensorLocation::Device));
        assert_eq!(engine.binding(0).unwrap().size_bytes(4), 48);
        assert!(engine.binding_index("missing").is_none());
    }

    #[test]
    fn test_serialize_round_trip() {
        let engine = relu_engine();
        let bytes = engine.serialize().unwrap();
        assert!(bytes.starts_with(ENGINE_MAGIC));
        let restored = Engine::deserialize(&bytes).unwrap();
        assert_eq!(restored.bindings(), engine.bindings());
        assert_eq!(restored.num_layers(), engine.num_layers());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(matches!(
            Engine::deserialize(b"garbage"),
            Err(EngineError::InvalidEngine(_))
        ));
        let mut bytes = ENGINE_MAGIC.to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(Engine::deserialize(&bytes).is_err());
    }
}
