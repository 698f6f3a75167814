// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication and the linear layer built on it.

use super::kernels::batched_matmul;
use super::{add, call_single, transpose};
use crate::dispatch::{Arg, OpArgs};
use crate::{Tensor, TensorError};

pub(super) fn matmul_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let lhs = args.tensor("matmul", "input", 0)?;
    let rhs = args.tensor("matmul", "other", 1)?;
    for t in [lhs, rhs] {
        if !t.dtype().is_floating() {
            return Err(TensorError::UnsupportedDType {
                op: "matmul",
                dtype: t.dtype(),
            });
        }
    }
    let (out, shape) = batched_matmul(&lhs.to_f32_vec(), lhs.shape(), &rhs.to_f32_vec(), rhs.shape())?;
    Ok(Tensor::from_values(shape, lhs.dtype(), &out)?.placed_on(lhs.device()))
}

/// `input @ weight^T + bias`, composed from `transpose`, `matmul` and `add`.
pub(super) fn linear_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("linear", "input", 0)?;
    let weight = args.tensor("linear", "weight", 1)?;
    let bias = args.get("bias", 2).and_then(Arg::as_tensor);
    let projected = matmul(input, &transpose(weight, 0, 1)?)?;
    match bias {
        Some(bias) => add(&projected, bias),
        None => Ok(projected),
    }
}

/// Matrix product `input @ other` over the last two dimensions.
///
/// Leading (batch) dimensions broadcast. Both inputs must have rank ≥ 2.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if inner dimensions differ.
pub fn matmul(input: &Tensor, other: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.matmul", OpArgs::new().with(input).with(other))
}

/// Affine projection with a `[out_features, in_features]` weight.
pub fn linear(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, TensorError> {
    call_single("ops.nn.linear", OpArgs::new().with(input).with(weight).with(bias))
}
