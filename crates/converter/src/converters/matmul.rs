// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiply and fully connected rules.

use crate::context::ConversionContext;
use crate::ConvertError;
use network_ir::{ElementWiseOp, TensorRef};
use tensor_core::{Arg, Shape, Tensor};

pub(super) fn convert_matmul(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let missing = || ConvertError::invalid_argument(record.path(), "expected two operands");
    let input = record.arg("input", 0).ok_or_else(missing)?;
    let other = record.arg("other", 1).ok_or_else(missing)?;
    let output = record.output()?;

    let handles = ctx.normalize_operands(record.path(), &[input, other])?;
    let product = multiply(ctx, handles[0], handles[1])?;
    let result = reshape_to(ctx, product, &output.shape().without_batch())?;
    ctx.set_handle(output, result);
    Ok(())
}

/// `input @ weight^T + bias` as one matrix multiply and an optional sum.
///
/// The internal transpose, matmul and add calls are not converted
/// separately.
pub(super) fn convert_linear(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record
        .arg("input", 0)
        .ok_or_else(|| ConvertError::invalid_argument(record.path(), "missing input"))?;
    let weight = record.tensor("weight", 1)?;
    let bias = record.optional_tensor("bias", 2);
    let output = record.output()?;

    let x = ctx.normalize_operands(record.path(), &[input])?[0];
    let w = transposed_weight(ctx, weight)?;
    let mut result = multiply(ctx, x, w)?;

    if let Some(bias) = bias {
        let b = ctx.normalize_operands(record.path(), &[&Arg::from(bias)])?[0];
        let rank = ctx.network().tensor(result)?.shape.rank();
        let b = ctx.broadcast_handles(&[b], rank)?[0];
        result = ctx.network_mut().add_elementwise(result, b, ElementWiseOp::Sum)?.output;
    }
    let result = reshape_to(ctx, result, &output.shape().without_batch())?;
    ctx.set_handle(output, result);
    Ok(())
}

/// `[in, out]` handle for a `[out, in]` weight.
fn transposed_weight(
    ctx: &mut ConversionContext,
    weight: &Tensor,
) -> Result<TensorRef, ConvertError> {
    if let Some(handle) = ctx.handle(weight) {
        let rank = ctx.network().tensor(handle)?.shape.rank();
        if rank != 2 {
            return Err(ConvertError::invalid_argument("ops.nn.linear", "weight must be a matrix"));
        }
        return Ok(ctx.network_mut().add_shuffle(handle, Some(vec![1, 0]), None)?.output);
    }
    let dims = weight.shape().dims();
    let [out_features, in_features] = dims else {
        return Err(ConvertError::invalid_argument(
            "ops.nn.linear",
            format!("weight must be a matrix, got {}", weight.shape()),
        ));
    };
    let (out_features, in_features) = (*out_features, *in_features);
    let values = weight.to_f32_vec();
    let mut transposed = vec![0.0; values.len()];
    for o in 0..out_features {
        for i in 0..in_features {
            transposed[i * out_features + o] = values[o * in_features + i];
        }
    }
    ctx.add_constant(Shape::matrix(in_features, out_features), weight.dtype(), transposed)
}

/// Matrix multiply after padding both operands to a common rank of at least 2.
fn multiply(
    ctx: &mut ConversionContext,
    a: TensorRef,
    b: TensorRef,
) -> Result<TensorRef, ConvertError> {
    let rank_a = ctx.network().tensor(a)?.shape.rank();
    let rank_b = ctx.network().tensor(b)?.shape.rank();
    let rank = rank_a.max(rank_b).max(2);
    let padded = ctx.broadcast_handles(&[a, b], rank)?;
    Ok(ctx.network_mut().add_matrix_multiply(padded[0], padded[1])?.output)
}

fn reshape_to(
    ctx: &mut ConversionContext,
    handle: TensorRef,
    target: &Shape,
) -> Result<TensorRef, ConvertError> {
    if &ctx.network().tensor(handle)?.shape == target {
        return Ok(handle);
    }
    Ok(ctx.network_mut().add_shuffle(handle, None, Some(target.clone()))?.output)
}
