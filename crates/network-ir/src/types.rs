// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element types, tensor locations and layer operation enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use tensor_core::DType;

/// Element type of a network tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Half,
    Int8,
    Int32,
    Bool,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        self.storage().size_bytes()
    }

    /// Byte layout used for bound buffers of this type.
    pub fn storage(self) -> DType {
        match self {
            DataType::Float => DType::F32,
            DataType::Half => DType::F16,
            DataType::Int8 => DType::I8,
            DataType::Int32 => DType::I32,
            DataType::Bool => DType::Bool,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Half => "half",
            DataType::Int8 => "int8",
            DataType::Int32 => "int32",
            DataType::Bool => "bool",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a bound buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLocation {
    #[default]
    Device,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementWiseOp {
    Sum,
    Sub,
    Prod,
    Div,
    Max,
    Min,
}

impl ElementWiseOp {
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            ElementWiseOp::Sum => a + b,
            ElementWiseOp::Sub => a - b,
            ElementWiseOp::Prod => a * b,
            ElementWiseOp::Div => a / b,
            ElementWiseOp::Max => a.max(b),
            ElementWiseOp::Min => a.min(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    Relu,
    Sigmoid,
    Tanh,
    Gelu,
}

impl ActivationType {
    pub fn apply(self, x: f32) -> f32 {
        use tensor_core::ops::kernels::{gelu_scalar, sigmoid_scalar};
        match self {
            ActivationType::Relu => x.max(0.0),
            ActivationType::Sigmoid => sigmoid_scalar(x),
            ActivationType::Tanh => x.tanh(),
            ActivationType::Gelu => gelu_scalar(x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Exp,
    Sqrt,
    Log,
    Abs,
    Neg,
}

impl UnaryOp {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Exp => x.exp(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Neg => -x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Avg,
}

/// Expands an axes bitmask into ascending dimension indices.
pub fn axes_from_mask(mask: u32) -> Vec<usize> {
    (0..32).filter(|bit| mask & (1 << bit) != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_sizes() {
        assert_eq!(DataType::Float.size_bytes(), 4);
        assert_eq!(DataType::Half.size_bytes(), 2);
        assert_eq!(DataType::Int8.size_bytes(), 1);
        assert_eq!(DataType::Int32.storage(), DType::I32);
    }

    #[test]
    fn test_axes_from_mask() {
        assert_eq!(axes_from_mask(0b101), vec![0, 2]);
        assert!(axes_from_mask(0).is_empty());
    }

    #[test]
    fn test_ops_apply() {
        assert_eq!(ElementWiseOp::Sub.apply(3.0, 1.0), 2.0);
        assert_eq!(ActivationType::Relu.apply(-2.0), 0.0);
        assert_eq!(UnaryOp::Neg.apply(2.0), -2.0);
    }
}
