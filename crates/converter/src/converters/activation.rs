// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::context::ConversionContext;
use crate::ConvertError;
use network_ir::{ActivationType, UnaryOp};

pub(super) fn activation(
    activation: ActivationType,
) -> impl Fn(&mut ConversionContext) -> Result<(), ConvertError> {
    move |ctx: &mut ConversionContext| {
        let record = ctx.record()?.clone();
        let input = record.arg("input", 0).ok_or_else(|| ConvertError::invalid_argument(record.path(), "missing input"))?;
        let handle = ctx.normalize_operands(record.path(), &[input])?[0];
        let layer = ctx.network_mut().add_activation(handle, activation)?;
        ctx.set_handle(record.output()?, layer.output);
        Ok(())
    }
}

pub(super) fn unary(op: UnaryOp) -> impl Fn(&mut ConversionContext) -> Result<(), ConvertError> {
    move |ctx: &mut ConversionContext| {
        let record = ctx.record()?.clone();
        let input = record.arg("input", 0).ok_or_else(|| ConvertError::invalid_argument(record.path(), "missing input"))?;
        let handle = ctx.normalize_operands(record.path(), &[input])?[0];
        let layer = ctx.network_mut().add_unary(handle, op)?;
        ctx.set_handle(record.output()?, layer.output);
        Ok(())
    }
}

/// Rule for composite calls whose internal calls are converted instead.
pub(super) fn passthrough(_ctx: &mut ConversionContext) -> Result<(), ConvertError> {
    Ok(())
}
