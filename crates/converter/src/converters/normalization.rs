// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::context::ConversionContext;
use crate::ConvertError;
use network_ir::TensorRef;
use tensor_core::{DType, Shape, Tensor};

const DEFAULT_EPS: f64 = 1e-5;

/// Fused layer normalization over the trailing `normalized_shape` dims.
pub(super) fn convert_layer_norm(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record.tensor("input", 0)?;
    let normalized = record
        .ints("normalized_shape", 1)
        .ok_or_else(|| ConvertError::invalid_argument(record.path(), "'normalized_shape' must be a list of ints"))?;
    let eps = record.float("eps", 4).unwrap_or(DEFAULT_EPS);

    let handle = ctx.required_handle(input)?;
    let rank = ctx.network().tensor(handle)?.shape.rank();
    if normalized.is_empty() || normalized.len() > rank {
        return Err(ConvertError::invalid_argument(
            record.path(),
            format!("cannot normalize {} trailing dims of a rank {rank} network tensor", normalized.len()),
        ));
    }
    let axes = (rank - normalized.len()..rank).fold(0u32, |mask, d| mask | 1 << d);
    let param_shape = Shape::new(normalized.iter().map(|&d| d.max(0) as usize).collect()).left_padded(rank);

    let dtype = input.dtype();
    let scale = parameter(ctx, record.optional_tensor("weight", 2), &param_shape, dtype, 1.0)?;
    let bias = parameter(ctx, record.optional_tensor("bias", 3), &param_shape, dtype, 0.0)?;
    let layer = ctx
        .network_mut()
        .add_normalization(handle, scale, bias, axes, eps as f32)?;
    ctx.set_handle(record.output()?, layer.output);
    Ok(())
}

/// Affine parameter padded to `shape`, or a constant `fill` when absent.
fn parameter(
    ctx: &mut ConversionContext,
    tensor: Option<&Tensor>,
    shape: &Shape,
    dtype: DType,
    fill: f32,
) -> Result<TensorRef, ConvertError> {
    let handle = match tensor {
        Some(t) => match ctx.handle(t) {
            Some(handle) => handle,
            None => {
                let handle = ctx.add_constant(t.shape().clone(), t.dtype(), t.to_f32_vec())?;
                ctx.set_handle(t, handle);
                handle
            }
        },
        None => ctx.add_constant(shape.clone(), dtype, vec![fill; shape.num_elements()])?,
    };
    Ok(ctx.broadcast_handles(&[handle], shape.rank())?[0])
}
