// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use super::{axes_mask, network_axis};
use crate::context::ConversionContext;
use crate::ConvertError;
use network_ir::ReduceOp;

pub(super) fn convert_softmax(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record.tensor("input", 0)?;
    let dim = record.int("dim", 1).unwrap_or(-1);
    let axis = network_axis(record.path(), input, dim)?;

    let handle = ctx.required_handle(input)?;
    let layer = ctx.network_mut().add_softmax(handle, 1 << axis)?;
    ctx.set_handle(record.output()?, layer.output);
    Ok(())
}

pub(super) fn convert_mean(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record.tensor("input", 0)?;
    let dims = record
        .ints("dim", 1)
        .ok_or_else(|| ConvertError::invalid_argument(record.path(), "reducing every dim includes the batch dimension"))?;
    let keep_dims = record.flag("keepdim", 2).unwrap_or(false);
    let axes = axes_mask(record.path(), input, &dims)?;

    let handle = ctx.required_handle(input)?;
    let layer = ctx.network_mut().add_reduce(handle, ReduceOp::Avg, axes, keep_dims)?;
    ctx.set_handle(record.output()?, layer.output);
    Ok(())
}
