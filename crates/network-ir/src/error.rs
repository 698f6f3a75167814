// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for network construction and engine build/execution.

use crate::DataType;
use tensor_core::Shape;

/// Errors raised while assembling a [`crate::NetworkDefinition`].
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A tensor handle does not belong to this network.
    #[error("unknown network tensor #{0}")]
    UnknownTensor(usize),

    /// An input with the same name already exists.
    #[error("duplicate network input '{0}'")]
    DuplicateInput(String),

    /// Operands of one layer have different element types.
    #[error("type mismatch in {layer}: {lhs} vs {rhs}")]
    TypeMismatch {
        layer: &'static str,
        lhs: DataType,
        rhs: DataType,
    },

    /// Operand shapes are incompatible for the layer.
    #[error("invalid shapes for {layer}: {lhs} vs {rhs}")]
    ShapeMismatch {
        layer: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// Constant weights do not fill the declared shape.
    #[error("constant of shape {shape} needs {expected} values, got {actual}")]
    InvalidConstant {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    /// A layer parameter is out of range for its input.
    #[error("invalid {layer} parameter: {detail}")]
    InvalidParameter { layer: &'static str, detail: String },

    /// A graph exchange document could not be read or written.
    #[error("exchange format error: {0}")]
    Exchange(String),
}

/// Errors raised by the builder and at execution time.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The builder rejected the network or configuration.
    #[error("engine build failed: {0}")]
    Build(String),

    /// Calibration could not produce dynamic ranges.
    #[error("calibration failed: {0}")]
    Calibration(String),

    /// Serialized engine bytes are malformed.
    #[error("invalid engine data: {0}")]
    InvalidEngine(String),

    /// Bindings passed to execution do not match the engine.
    #[error("binding error: {0}")]
    Binding(String),

    /// A layer failed while the engine was running.
    #[error("execution failed in layer '{layer}': {detail}")]
    Execution { layer: String, detail: String },

    #[error(transparent)]
    Network(#[from] NetworkError),
}
