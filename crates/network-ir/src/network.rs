// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The network definition: a static DAG of layers over named tensors.
//!
//! Shapes in a network never include the batch dimension. The engine built
//! from it is batch-size parametric: the same network runs for any batch
//! size up to the builder's maximum.
//!
//! Layers are appended in dependency order (a layer can only consume
//! tensors that already exist), so the layer list is always a valid
//! execution order.

use crate::types::{axes_from_mask, ActivationType, DataType, ElementWiseOp, ReduceOp, TensorLocation, UnaryOp};
use crate::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tensor_core::Shape;

/// Handle to a tensor inside one [`NetworkDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorRef(usize);

impl TensorRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A freshly added layer and the tensor it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRef {
    pub index: usize,
    pub output: TensorRef,
}

/// Metadata of one network tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTensor {
    pub name: String,
    /// Shape without the batch dimension.
    pub shape: Shape,
    pub dtype: DataType,
    pub location: TensorLocation,
    /// Symmetric range `[-r, r]` used for INT8 quantization.
    pub dynamic_range: Option<f32>,
}

/// Constant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub dtype: DataType,
    pub values: Vec<f32>,
}

/// What a layer computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    Constant {
        shape: Shape,
        weights: Weights,
    },
    /// Optional transpose followed by an optional reshape.
    Shuffle {
        first_transpose: Option<Vec<usize>>,
        reshape: Option<Shape>,
    },
    ElementWise {
        op: ElementWiseOp,
    },
    Activation {
        activation: ActivationType,
    },
    Unary {
        op: UnaryOp,
    },
    MatrixMultiply,
    /// Softmax along the single dimension set in `axes`.
    SoftMax {
        axes: u32,
    },
    Reduce {
        op: ReduceOp,
        axes: u32,
        keep_dims: bool,
    },
    /// Zero-mean unit-variance over `axes`, then `* scale + bias`.
    Normalization {
        axes: u32,
        epsilon: f32,
    },
    Identity,
}

impl LayerKind {
    /// Upper-case layer type label.
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Constant { .. } => "CONSTANT",
            LayerKind::Shuffle { .. } => "SHUFFLE",
            LayerKind::ElementWise { .. } => "ELEMENTWISE",
            LayerKind::Activation { .. } => "ACTIVATION",
            LayerKind::Unary { .. } => "UNARY",
            LayerKind::MatrixMultiply => "MATRIX_MULTIPLY",
            LayerKind::SoftMax { .. } => "SOFTMAX",
            LayerKind::Reduce { .. } => "REDUCE",
            LayerKind::Normalization { .. } => "NORMALIZATION",
            LayerKind::Identity => "IDENTITY",
        }
    }
}

/// One layer of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub inputs: Vec<TensorRef>,
    pub output: TensorRef,
}

/// A network under construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDefinition {
    name: String,
    tensors: Vec<NetworkTensor>,
    layers: Vec<Layer>,
    inputs: Vec<TensorRef>,
    outputs: Vec<TensorRef>,
}

impl NetworkDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // ── Inspection ─────────────────────────────────────────────

    pub fn tensor(&self, t: TensorRef) -> Result<&NetworkTensor, NetworkError> {
        self.tensors.get(t.0).ok_or(NetworkError::UnknownTensor(t.0))
    }

    pub fn tensors(&self) -> &[NetworkTensor] {
        &self.tensors
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn inputs(&self) -> &[TensorRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorRef] {
        &self.outputs
    }

    /// Number of layers of the given type name (e.g. `"ELEMENTWISE"`).
    pub fn count_layers(&self, type_name: &str) -> usize {
        self.layers
            .iter()
            .filter(|l| l.kind.type_name() == type_name)
            .count()
    }

    // ── Tensor attributes ──────────────────────────────────────

    fn tensor_mut(&mut self, t: TensorRef) -> Result<&mut NetworkTensor, NetworkError> {
        self.tensors.get_mut(t.0).ok_or(NetworkError::UnknownTensor(t.0))
    }

    pub fn set_tensor_name(
        &mut self,
        t: TensorRef,
        name: impl Into<String>,
    ) -> Result<(), NetworkError> {
        self.tensor_mut(t)?.name = name.into();
        Ok(())
    }

    pub fn set_tensor_location(
        &mut self,
        t: TensorRef,
        location: TensorLocation,
    ) -> Result<(), NetworkError> {
        self.tensor_mut(t)?.location = location;
        Ok(())
    }

    pub fn set_tensor_dtype(&mut self, t: TensorRef, dtype: DataType) -> Result<(), NetworkError> {
        self.tensor_mut(t)?.dtype = dtype;
        Ok(())
    }

    pub fn set_dynamic_range(&mut self, t: TensorRef, range: f32) -> Result<(), NetworkError> {
        self.tensor_mut(t)?.dynamic_range = Some(range.abs());
        Ok(())
    }

    pub fn set_layer_name(&mut self, layer: usize, name: impl Into<String>) {
        if let Some(l) = self.layers.get_mut(layer) {
            l.name = name.into();
        }
    }

    /// Marks `t` as a network output. Marking twice is a no-op.
    pub fn mark_output(&mut self, t: TensorRef) -> Result<(), NetworkError> {
        let name = self.tensor(t)?.name.clone();
        if self.outputs.contains(&t) {
            tracing::warn!(tensor = %name, "tensor already marked as output");
            return Ok(());
        }
        self.outputs.push(t);
        Ok(())
    }

    // ── Layer construction ─────────────────────────────────────

    pub fn add_input(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: Shape,
    ) -> Result<TensorRef, NetworkError> {
        if self.inputs.iter().any(|&i| self.tensors[i.0].name == name) {
            return Err(NetworkError::DuplicateInput(name.to_string()));
        }
        let t = self.push_tensor(name.to_string(), shape, dtype);
        self.inputs.push(t);
        Ok(t)
    }

    pub fn add_constant(
        &mut self,
        shape: Shape,
        weights: Weights,
    ) -> Result<LayerRef, NetworkError> {
        if weights.values.len() != shape.num_elements() {
            return Err(NetworkError::InvalidConstant {
                expected: shape.num_elements(),
                actual: weights.values.len(),
                shape,
            });
        }
        let dtype = weights.dtype;
        let kind = LayerKind::Constant {
            shape: shape.clone(),
            weights,
        };
        Ok(self.push_layer(kind, vec![], shape, dtype))
    }

    pub fn add_shuffle(
        &mut self,
        input: TensorRef,
        first_transpose: Option<Vec<usize>>,
        reshape: Option<Shape>,
    ) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        let mut shape = src.shape.clone();
        if let Some(perm) = &first_transpose {
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            if sorted != (0..shape.rank()).collect::<Vec<_>>() {
                return Err(NetworkError::InvalidParameter {
                    layer: "shuffle",
                    detail: format!("{perm:?} is not a permutation of rank {}", shape.rank()),
                });
            }
            shape = Shape::new(perm.iter().map(|&p| shape.dims()[p]).collect());
        }
        if let Some(target) = &reshape {
            if target.num_elements() != shape.num_elements() {
                return Err(NetworkError::ShapeMismatch {
                    layer: "shuffle",
                    lhs: shape,
                    rhs: target.clone(),
                });
            }
            shape = target.clone();
        }
        let kind = LayerKind::Shuffle {
            first_transpose,
            reshape,
        };
        Ok(self.push_layer(kind, vec![input], shape, src.dtype))
    }

    /// Element-wise binary layer. Operands must have equal rank; size-1
    /// dimensions broadcast.
    pub fn add_elementwise(
        &mut self,
        a: TensorRef,
        b: TensorRef,
        op: ElementWiseOp,
    ) -> Result<LayerRef, NetworkError> {
        let (ta, tb) = (self.tensor(a)?.clone(), self.tensor(b)?.clone());
        if ta.dtype != tb.dtype {
            return Err(NetworkError::TypeMismatch {
                layer: "elementwise",
                lhs: ta.dtype,
                rhs: tb.dtype,
            });
        }
        let shape = (ta.shape.rank() == tb.shape.rank())
            .then(|| ta.shape.broadcast(&tb.shape))
            .flatten()
            .ok_or_else(|| NetworkError::ShapeMismatch {
                layer: "elementwise",
                lhs: ta.shape.clone(),
                rhs: tb.shape.clone(),
            })?;
        Ok(self.push_layer(LayerKind::ElementWise { op }, vec![a, b], shape, ta.dtype))
    }

    pub fn add_activation(
        &mut self,
        input: TensorRef,
        activation: ActivationType,
    ) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        Ok(self.push_layer(LayerKind::Activation { activation }, vec![input], src.shape, src.dtype))
    }

    pub fn add_unary(&mut self, input: TensorRef, op: UnaryOp) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        Ok(self.push_layer(LayerKind::Unary { op }, vec![input], src.shape, src.dtype))
    }

    /// `[..., m, k] x [..., k, n]`; operands must have equal rank ≥ 2.
    pub fn add_matrix_multiply(
        &mut self,
        a: TensorRef,
        b: TensorRef,
    ) -> Result<LayerRef, NetworkError> {
        let (ta, tb) = (self.tensor(a)?.clone(), self.tensor(b)?.clone());
        if ta.dtype != tb.dtype {
            return Err(NetworkError::TypeMismatch {
                layer: "matrix_multiply",
                lhs: ta.dtype,
                rhs: tb.dtype,
            });
        }
        let mismatch = || NetworkError::ShapeMismatch {
            layer: "matrix_multiply",
            lhs: ta.shape.clone(),
            rhs: tb.shape.clone(),
        };
        if ta.shape.rank() != tb.shape.rank() || !ta.shape.is_matmul_compatible(&tb.shape) {
            return Err(mismatch());
        }
        let r = ta.shape.rank();
        let (da, db) = (ta.shape.dims(), tb.shape.dims());
        let batch = Shape::new(da[..r - 2].to_vec())
            .broadcast(&Shape::new(db[..r - 2].to_vec()))
            .ok_or_else(mismatch)?;
        let mut dims = batch.dims().to_vec();
        dims.extend_from_slice(&[da[r - 2], db[r - 1]]);
        Ok(self.push_layer(LayerKind::MatrixMultiply, vec![a, b], Shape::new(dims), ta.dtype))
    }

    pub fn add_softmax(&mut self, input: TensorRef, axes: u32) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        if axes.count_ones() != 1 || axes_from_mask(axes)[0] >= src.shape.rank() {
            return Err(NetworkError::InvalidParameter {
                layer: "softmax",
                detail: format!("axes {axes:#b} must select one of {} dims", src.shape.rank()),
            });
        }
        Ok(self.push_layer(LayerKind::SoftMax { axes }, vec![input], src.shape, src.dtype))
    }

    pub fn add_reduce(
        &mut self,
        input: TensorRef,
        op: ReduceOp,
        axes: u32,
        keep_dims: bool,
    ) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        let dims = axes_from_mask(axes);
        if dims.is_empty() || dims.iter().any(|&d| d >= src.shape.rank()) {
            return Err(NetworkError::InvalidParameter {
                layer: "reduce",
                detail: format!("axes {axes:#b} out of range for {}", src.shape),
            });
        }
        let out: Vec<usize> = src
            .shape
            .dims()
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| match (dims.contains(&i), keep_dims) {
                (true, true) => Some(1),
                (true, false) => None,
                (false, _) => Some(d),
            })
            .collect();
        let kind = LayerKind::Reduce { op, axes, keep_dims };
        Ok(self.push_layer(kind, vec![input], Shape::new(out), src.dtype))
    }

    /// Normalization over the trailing dimensions selected by `axes`.
    pub fn add_normalization(
        &mut self,
        input: TensorRef,
        scale: TensorRef,
        bias: TensorRef,
        axes: u32,
        epsilon: f32,
    ) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        let rank = src.shape.rank();
        let dims = axes_from_mask(axes);
        let trailing = !dims.is_empty() && dims == (rank - dims.len().min(rank)..rank).collect::<Vec<_>>();
        if !trailing || dims.len() > rank {
            return Err(NetworkError::InvalidParameter {
                layer: "normalization",
                detail: format!("axes {axes:#b} must be trailing dims of {}", src.shape),
            });
        }
        for param in [scale, bias] {
            let p = self.tensor(param)?;
            if p.shape.rank() != rank || p.shape.broadcast(&src.shape).as_ref() != Some(&src.shape) {
                return Err(NetworkError::ShapeMismatch {
                    layer: "normalization",
                    lhs: src.shape.clone(),
                    rhs: p.shape.clone(),
                });
            }
        }
        let kind = LayerKind::Normalization { axes, epsilon };
        Ok(self.push_layer(kind, vec![input, scale, bias], src.shape, src.dtype))
    }

    pub fn add_identity(&mut self, input: TensorRef) -> Result<LayerRef, NetworkError> {
        let src = self.tensor(input)?.clone();
        Ok(self.push_layer(LayerKind::Identity, vec![input], src.shape, src.dtype))
    }

    fn push_tensor(&mut self, name: String, shape: Shape, dtype: DataType) -> TensorRef {
        self.tensors.push(NetworkTensor {
            name,
            shape,
            dtype,
            location: TensorLocation::Device,
            dynamic_range: None,
        });
        TensorRef(self.tensors.len() - 1)
    }

    fn push_layer(
        &mut self,
        kind: LayerKind,
        inputs: Vec<TensorRef>,
        shape: Shape,
        dtype: DataType,
    ) -> LayerRef {
        let index = self.layers.len();
        let name = format!("(Unnamed Layer* {index}) [{}]", kind.type_name());
        let output = self.push_tensor(format!("{name}_output"), shape, dtype);
        self.layers.push(Layer {
            name,
            kind,
            inputs,
            output,
        });
        LayerRef { index, output }
    }
}

impl fmt::Display for NetworkDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network '{}' ({} inputs, {} layers, {} outputs):",
            self.name,
            self.inputs.len(),
            self.layers.len(),
            self.outputs.len()
        )?;
        for layer in &self.layers {
            let out = &self.tensors[layer.output.0];
            writeln!(f, "  {} -> {} {}", layer.name, out.shape, out.dtype)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net_with_input(shape: Shape) -> (NetworkDefinition, TensorRef) {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, shape).unwrap();
        (net, x)
    }

    fn constant(net: &mut NetworkDefinition, shape: Shape, value: f32) -> TensorRef {
        let weights = Weights {
            dtype: DataType::Float,
            values: vec![value; shape.num_elements()],
        };
        net.add_constant(shape, weights).unwrap().output
    }

    #[test]
    fn test_duplicate_input() {
        let (mut net, _) = net_with_input(Shape::vector(3));
        assert!(matches!(
            net.add_input("x", DataType::Float, Shape::vector(3)),
            Err(NetworkError::DuplicateInput(_))
        ));
    }

    #[test]
    fn test_constant_size_checked() {
        let mut net = NetworkDefinition::new();
        let weights = Weights {
            dtype: DataType::Float,
            values: vec![1.0; 3],
        };
        assert!(net.add_constant(Shape::vector(4), weights).is_err());
    }

    #[test]
    fn test_elementwise_requires_equal_rank() {
        let (mut net, x) = net_with_input(Shape::matrix(2, 3));
        let c1 = constant(&mut net, Shape::vector(3), 1.0);
        assert!(net.add_elementwise(x, c1, ElementWiseOp::Sum).is_err());

        let c2 = constant(&mut net, Shape::new(vec![1, 3]), 1.0);
        let sum = net.add_elementwise(x, c2, ElementWiseOp::Sum).unwrap();
        assert_eq!(net.tensor(sum.output).unwrap().shape, Shape::matrix(2, 3));
    }

    #[test]
    fn test_elementwise_type_mismatch() {
        let (mut net, x) = net_with_input(Shape::vector(2));
        let weights = Weights {
            dtype: DataType::Int32,
            values: vec![1.0, 2.0],
        };
        let c = net.add_constant(Shape::vector(2), weights).unwrap().output;
        assert!(matches!(
            net.add_elementwise(x, c, ElementWiseOp::Prod),
            Err(NetworkError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_shuffle_shapes() {
        let (mut net, x) = net_with_input(Shape::matrix(2, 3));
        let t = net.add_shuffle(x, Some(vec![1, 0]), None).unwrap();
        assert_eq!(net.tensor(t.output).unwrap().shape, Shape::matrix(3, 2));
        let r = net.add_shuffle(x, None, Some(Shape::new(vec![1, 6]))).unwrap();
        assert_eq!(net.tensor(r.output).unwrap().shape, Shape::new(vec![1, 6]));
        assert!(net.add_shuffle(x, None, Some(Shape::vector(5))).is_err());
        assert!(net.add_shuffle(x, Some(vec![0, 0]), None).is_err());
    }

    #[test]
    fn test_matrix_multiply_shape() {
        let (mut net, x) = net_with_input(Shape::matrix(2, 3));
        let w = constant(&mut net, Shape::matrix(3, 4), 0.5);
        let y = net.add_matrix_multiply(x, w).unwrap();
        assert_eq!(net.tensor(y.output).unwrap().shape, Shape::matrix(2, 4));
    }

    #[test]
    fn test_reduce_and_softmax_axes() {
        let (mut net, x) = net_with_input(Shape::matrix(2, 3));
        let r = net.add_reduce(x, ReduceOp::Avg, 0b10, true).unwrap();
        assert_eq!(net.tensor(r.output).unwrap().shape, Shape::matrix(2, 1));
        let r = net.add_reduce(x, ReduceOp::Avg, 0b10, false).unwrap();
        assert_eq!(net.tensor(r.output).unwrap().shape, Shape::vector(2));
        assert!(net.add_reduce(x, ReduceOp::Avg, 0b100, false).is_err());
        assert!(net.add_softmax(x, 0b11).is_err());
        assert!(net.add_softmax(x, 0b10).is_ok());
    }

    #[test]
    fn test_normalization_requires_trailing_axes() {
        let (mut net, x) = net_with_input(Shape::matrix(2, 4));
        let scale = constant(&mut net, Shape::new(vec![1, 4]), 1.0);
        let bias = constant(&mut net, Shape::new(vec![1, 4]), 0.0);
        assert!(net.add_normalization(x, scale, bias, 0b10, 1e-5).is_ok());
        assert!(net.add_normalization(x, scale, bias, 0b01, 1e-5).is_err());
    }

    #[test]
    fn test_default_layer_names_and_counts() {
        let (mut net, x) = net_with_input(Shape::vector(2));
        let relu = net.add_activation(x, ActivationType::Relu).unwrap();
        assert_eq!(net.layers()[relu.index].name, "(Unnamed Layer* 0) [ACTIVATION]");
        net.set_layer_name(relu.index, "relu");
        assert_eq!(net.layers()[0].name, "relu");
        assert_eq!(net.count_layers("ACTIVATION"), 1);

        net.mark_output(relu.output).unwrap();
        net.mark_output(relu.output).unwrap();
        assert_eq!(net.outputs().len(), 1);
        assert!(format!("{net}").contains("1 outputs"));
    }
}
