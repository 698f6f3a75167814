// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use super::network_axis;
use crate::context::ConversionContext;
use crate::ConvertError;

pub(super) fn convert_reshape(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record.tensor("input", 0)?;
    let output = record.output()?;
    if output.shape().dim(0) != input.shape().dim(0) {
        return Err(ConvertError::invalid_argument(
            record.path(),
            format!("reshape {} -> {} changes the batch dimension", input.shape(), output.shape()),
        ));
    }
    let handle = ctx.required_handle(input)?;
    let target = output.shape().without_batch();
    let layer = ctx.network_mut().add_shuffle(handle, None, Some(target))?;
    ctx.set_handle(output, layer.output);
    Ok(())
}

pub(super) fn convert_transpose(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let input = record.tensor("input", 0)?;
    let dim = |name: &str, position: usize| {
        let d = record
            .int(name, position)
            .ok_or_else(|| ConvertError::invalid_argument(record.path(), format!("'{name}' must be an int")))?;
        network_axis(record.path(), input, d)
    };
    let (d0, d1) = (dim("dim0", 1)?, dim("dim1", 2)?);

    let handle = ctx.required_handle(input)?;
    let mut perm: Vec<usize> = (0..input.rank() - 1).collect();
    perm.swap(d0, d1);
    let layer = ctx.network_mut().add_shuffle(handle, Some(perm), None)?;
    ctx.set_handle(record.output()?, layer.output);
    Ok(())
}

/// Contiguous copies keep the value's existing handle.
pub(super) fn convert_contiguous(ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    let record = ctx.record()?.clone();
    let output = record.output()?;
    if ctx.handle(output).is_some() {
        return Ok(());
    }
    let handle = ctx.required_handle(record.tensor("input", 0)?)?;
    let layer = ctx.network_mut().add_identity(handle)?;
    ctx.set_handle(output, layer.output);
    Ok(())
}
