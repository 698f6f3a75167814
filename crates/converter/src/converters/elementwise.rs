// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::context::ConversionContext;
use crate::ConvertError;
use network_ir::ElementWiseOp;

/// Binary elementwise rule with host-style broadcasting.
pub(super) fn binary(
    op: ElementWiseOp,
) -> impl Fn(&mut ConversionContext) -> Result<(), ConvertError> {
    move |ctx: &mut ConversionContext| {
        let record = ctx.record()?.clone();
        let missing = || ConvertError::invalid_argument(record.path(), "expected two operands");
        let input = record.arg("input", 0).ok_or_else(missing)?;
        let other = record.arg("other", 1).ok_or_else(missing)?;
        let output = record.output()?;

        let handles = ctx.add_missing_handles(record.path(), &[input, other], output)?;
        let layer = ctx.network_mut().add_elementwise(handles[0], handles[1], op)?;
        ctx.set_handle(output, layer.output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OpRecord;
    use tensor_core::{ops, DType, OpArgs, OpOutput, Shape, Tensor};

    #[test]
    fn test_scalar_operand_on_the_left() {
        let mut ctx = ConversionContext::new();
        let x = Tensor::zeros(Shape::matrix(1, 4), DType::F32);
        ctx.add_inputs(&[x.clone()], &["x".into()]).unwrap();
        let y = ops::sub(2.0, &x).unwrap();
        let args = OpArgs::new().with(2.0).with(&x);
        ctx.begin_record(OpRecord::new("ops.sub".into(), args, OpOutput::Tensor(y.clone())));
        binary(ElementWiseOp::Sub)(&mut ctx).unwrap();
        let layer = ctx.network().layers().last().unwrap();
        assert_eq!(layer.kind.type_name(), "ELEMENTWISE");
        assert_eq!(ctx.network().tensor(ctx.handle(&y).unwrap()).unwrap().shape, Shape::vector(4));
    }
}
