// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in conversion rules.
//!
//! Each rule reads the current [`OpRecord`](crate::OpRecord), builds the
//! equivalent layers, and attaches the final layer's output to the call's
//! returned tensor.

mod activation;
mod elementwise;
mod matmul;
mod normalization;
mod reduce;
mod shuffle;

use crate::registry::ConverterRegistry;
use crate::ConvertError;
use network_ir::{ActivationType, ElementWiseOp, UnaryOp};
use tensor_core::Tensor;

/// Registers every built-in rule into `registry`.
pub fn register_builtin(registry: &mut ConverterRegistry) {
    for (path, op) in [
        ("ops.add", ElementWiseOp::Sum),
        ("ops.Tensor.add", ElementWiseOp::Sum),
        ("ops.sub", ElementWiseOp::Sub),
        ("ops.mul", ElementWiseOp::Prod),
        ("ops.Tensor.mul", ElementWiseOp::Prod),
        ("ops.div", ElementWiseOp::Div),
    ] {
        registry.register(path, elementwise::binary(op), true, true);
    }

    for (path, activation) in [
        ("ops.relu", ActivationType::Relu),
        ("ops.sigmoid", ActivationType::Sigmoid),
        ("ops.tanh", ActivationType::Tanh),
        ("ops.nn.gelu", ActivationType::Gelu),
    ] {
        registry.register(path, activation::activation(activation), true, true);
    }
    registry.register("ops.exp", activation::unary(UnaryOp::Exp), true, true);
    registry.register("ops.sqrt", activation::unary(UnaryOp::Sqrt), true, true);
    // Converted through its mul/sigmoid expansion.
    registry.register("ops.nn.silu", activation::passthrough, false, true);

    registry.register("ops.matmul", matmul::convert_matmul, true, true);
    registry.register("ops.nn.linear", matmul::convert_linear, true, true);

    registry.register("ops.nn.softmax", reduce::convert_softmax, true, true);
    registry.register("ops.mean", reduce::convert_mean, true, true);

    registry.register("ops.nn.layer_norm", normalization::convert_layer_norm, true, true);

    registry.register("ops.reshape", shuffle::convert_reshape, true, true);
    registry.register("ops.Tensor.reshape", shuffle::convert_reshape, true, true);
    registry.register("ops.transpose", shuffle::convert_transpose, true, true);
    registry.register("ops.Tensor.contiguous", shuffle::convert_contiguous, true, true);

    tracing::debug!(rules = registry.len(), "registered built-in conversion rules");
}

/// Network axis of host dimension `dim` of `tensor`.
///
/// Negative dims count from the end. The batch dimension has no network
/// axis, so host dim 0 is rejected.
pub(crate) fn network_axis(op: &str, tensor: &Tensor, dim: i64) -> Result<usize, ConvertError> {
    let resolved = tensor.shape().resolve_dim(dim).ok_or_else(|| {
        ConvertError::invalid_argument(op, format!("dim {dim} out of range for {}", tensor.shape()))
    })?;
    if resolved == 0 {
        return Err(ConvertError::invalid_argument(op, "cannot operate over the batch dimension"));
    }
    Ok(resolved - 1)
}

/// Reduce-axes bitmask for host dims `dims` of `tensor`.
pub(crate) fn axes_mask(op: &str, tensor: &Tensor, dims: &[i64]) -> Result<u32, ConvertError> {
    dims.iter()
        .try_fold(0u32, |mask, &d| Ok(mask | 1 << network_axis(op, tensor, d)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape};

    #[test]
    fn test_axes_skip_batch() {
        let x = Tensor::zeros(Shape::new(vec![1, 3, 4]), DType::F32);
        assert_eq!(network_axis("softmax", &x, -1).unwrap(), 1);
        assert_eq!(network_axis("softmax", &x, 1).unwrap(), 0);
        assert!(network_axis("softmax", &x, 0).is_err());
        assert!(network_axis("softmax", &x, 3).is_err());
        assert_eq!(axes_mask("mean", &x, &[1, 2]).unwrap(), 0b11);
    }
}
