// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand normalization: constant materialization and rank broadcasting.
//!
//! Conversion rules receive a mix of traced tensors, untraced host tensors
//! (weights, literals) and plain scalars. Before building a layer every
//! operand needs a network handle, and operands of broadcasting layers need
//! equal rank. Two materialization policies exist:
//!
//! - [`ConversionContext::add_missing_handles`] (elementwise call sites):
//!   a scalar becomes a `(1,)` constant and a host tensor loses its leading
//!   singleton dims, after which operands are left-padded to the output rank.
//! - [`ConversionContext::normalize_operands`] (matrix and single-input call
//!   sites): a scalar becomes a constant of the full target rank and a host
//!   tensor keeps its shape.

use crate::context::ConversionContext;
use crate::dtype_map;
use crate::ConvertError;
use network_ir::{TensorRef, Weights};
use tensor_core::{Arg, DType, Shape, Tensor};

impl ConversionContext {
    /// Element type shared by every tensor operand of the current call.
    ///
    /// # Errors
    /// [`ConvertError::TypeInference`] when no operand is a tensor and
    /// [`ConvertError::TypeMismatch`] when tensors disagree.
    pub fn check_dtype(&self, op: &str, operands: &[&Arg]) -> Result<DType, ConvertError> {
        let mut found: Option<DType> = None;
        for tensor in operands.iter().filter_map(|arg| arg.as_tensor()) {
            match found {
                None => found = Some(tensor.dtype()),
                Some(expected) if expected != tensor.dtype() => {
                    return Err(ConvertError::TypeMismatch {
                        op: op.to_string(),
                        expected,
                        found: tensor.dtype(),
                    })
                }
                Some(_) => {}
            }
        }
        found.ok_or_else(|| ConvertError::TypeInference { op: op.to_string() })
    }

    /// Adds a constant layer holding `values` and returns its output.
    pub fn add_constant(
        &mut self,
        shape: Shape,
        dtype: DType,
        values: Vec<f32>,
    ) -> Result<TensorRef, ConvertError> {
        let weights = Weights {
            dtype: dtype_map::data_type(dtype)?,
            values,
        };
        Ok(self.network_mut().add_constant(shape, weights)?.output)
    }

    /// Handles for elementwise operands, padded to the rank of `output`.
    ///
    /// Scalars become `(1,)` constants. Host tensors become constants with
    /// their leading singleton dims stripped; the handle is attached to the
    /// tensor, so a second use reuses the same constant.
    pub fn add_missing_handles(
        &mut self,
        op: &str,
        operands: &[&Arg],
        output: &Tensor,
    ) -> Result<Vec<TensorRef>, ConvertError> {
        let dtype = self.check_dtype(op, operands)?;
        let mut handles = Vec::with_capacity(operands.len());
        for arg in operands {
            let handle = match arg {
                Arg::Tensor(tensor) => self.tensor_constant(tensor, true)?,
                other => {
                    let value = scalar_value(op, other)?;
                    self.add_constant(Shape::vector(1), dtype, vec![value])?
                }
            };
            handles.push(handle);
        }
        self.broadcast_handles(&handles, output.rank().saturating_sub(1))
    }

    /// Handles for matrix or single-input operands, all at one common rank.
    ///
    /// The rank is the largest network rank among operands that already
    /// have handles, or the largest host rank when none do. Host tensors
    /// become constants of their full shape; scalars become constants of
    /// shape `(1,) * rank`.
    pub fn normalize_operands(
        &mut self,
        op: &str,
        operands: &[&Arg],
    ) -> Result<Vec<TensorRef>, ConvertError> {
        let dtype = self.check_dtype(op, operands)?;
        let mut traced_rank = None;
        let mut host_rank = 0;
        for tensor in operands.iter().filter_map(|arg| arg.as_tensor()) {
            host_rank = host_rank.max(tensor.rank());
            if let Some(handle) = self.handle(tensor) {
                let rank = self.network().tensor(handle)?.shape.rank();
                traced_rank = Some(traced_rank.map_or(rank, |r: usize| r.max(rank)));
            }
        }
        let rank = traced_rank.unwrap_or(host_rank);

        let mut handles = Vec::with_capacity(operands.len());
        for arg in operands {
            let handle = match arg {
                Arg::Tensor(tensor) => self.tensor_constant(tensor, false)?,
                other => {
                    let value = scalar_value(op, other)?;
                    let shape = Shape::ones(rank.max(1));
                    self.add_constant(shape, dtype, vec![value])?
                }
            };
            handles.push(handle);
        }
        self.broadcast_handles(&handles, rank)
    }

    /// Left-pads every handle below `rank` with singleton dims.
    pub fn broadcast_handles(
        &mut self,
        handles: &[TensorRef],
        rank: usize,
    ) -> Result<Vec<TensorRef>, ConvertError> {
        handles
            .iter()
            .map(|&handle| {
                let shape = self.network().tensor(handle)?.shape.clone();
                if shape.rank() >= rank {
                    return Ok(handle);
                }
                let padded = shape.left_padded(rank);
                Ok(self.network_mut().add_shuffle(handle, None, Some(padded))?.output)
            })
            .collect()
    }

    /// Existing handle of `tensor`, or a new constant holding its values.
    fn tensor_constant(&mut self, tensor: &Tensor, strip: bool) -> Result<TensorRef, ConvertError> {
        if let Some(handle) = self.handle(tensor) {
            return Ok(handle);
        }
        if let Some(path) = self.untraced_source(tensor) {
            return Err(ConvertError::UnsupportedOperation(path.to_string()));
        }
        let mut shape = if strip {
            tensor.shape().strip_leading_ones()
        } else {
            tensor.shape().clone()
        };
        if shape.rank() == 0 {
            shape = Shape::vector(1);
        }
        let handle = self.add_constant(shape, tensor.dtype(), tensor.to_f32_vec())?;
        self.set_handle(tensor, handle);
        Ok(handle)
    }
}

fn scalar_value(op: &str, arg: &Arg) -> Result<f32, ConvertError> {
    arg.as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| ConvertError::invalid_argument(op, format!("cannot use {} as an operand", arg.describe())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use network_ir::LayerKind;

    fn traced(ctx: &mut ConversionContext, shape: Shape) -> Tensor {
        let x = Tensor::zeros(shape, DType::F32);
        let name = format!("input_{}", ctx.network().inputs().len());
        ctx.add_inputs(&[x.clone()], &[name]).unwrap();
        x
    }

    fn rank_of(ctx: &ConversionContext, handle: TensorRef) -> usize {
        ctx.network().tensor(handle).unwrap().shape.rank()
    }

    #[test]
    fn test_dtype_inference() {
        let ctx = ConversionContext::new();
        let a = Arg::from(Tensor::zeros(Shape::vector(1), DType::F32));
        let b = Arg::from(Tensor::zeros(Shape::vector(1), DType::F16));
        let s = Arg::Scalar(1.0);
        assert_eq!(ctx.check_dtype("add", &[&a, &s]).unwrap(), DType::F32);
        assert!(matches!(ctx.check_dtype("add", &[&a, &b]), Err(ConvertError::TypeMismatch { .. })));
        assert!(matches!(ctx.check_dtype("add", &[&s, &s]), Err(ConvertError::TypeInference { .. })));
    }

    #[test]
    fn test_scalar_becomes_unit_constant_then_padded() {
        let mut ctx = ConversionContext::new();
        let x = traced(&mut ctx, Shape::new(vec![1, 3, 4]));
        let handles = ctx
            .add_missing_handles("add", &[&Arg::from(&x), &Arg::Scalar(2.5)], &x)
            .unwrap();
        assert_eq!(rank_of(&ctx, handles[1]), 2);
        let constants: Vec<_> = ctx
            .network()
            .layers()
            .iter()
            .filter_map(|l| match &l.kind {
                LayerKind::Constant { shape, weights } => Some((shape.clone(), weights.values.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(constants, vec![(Shape::vector(1), vec![2.5])]);
    }

    #[test]
    fn test_host_constant_is_stripped_and_reused() {
        let mut ctx = ConversionContext::new();
        let x = traced(&mut ctx, Shape::new(vec![1, 2, 3]));
        let w = Tensor::from_f32(Shape::new(vec![1, 1, 3]), &[1.0, 2.0, 3.0]).unwrap();
        let args = [Arg::from(&x), Arg::from(&w)];
        ctx.add_missing_handles("mul", &[&args[0], &args[1]], &x).unwrap();
        let first = ctx.handle(&w).unwrap();
        assert_eq!(ctx.network().tensor(first).unwrap().shape, Shape::vector(3));
        ctx.add_missing_handles("mul", &[&args[0], &args[1]], &x).unwrap();
        assert_eq!(ctx.handle(&w), Some(first));
        assert_eq!(ctx.network().count_layers("CONSTANT"), 1);
    }

    #[test]
    fn test_normalize_pads_to_traced_rank() {
        let mut ctx = ConversionContext::new();
        let x = traced(&mut ctx, Shape::new(vec![1, 2, 3, 4]));
        let w = Tensor::zeros(Shape::matrix(4, 5), DType::F32);
        let s = Arg::Scalar(0.5);
        let args = [Arg::from(&x), Arg::from(&w)];
        let handles = ctx.normalize_operands("matmul", &[&args[0], &args[1], &s]).unwrap();
        assert!(handles.iter().all(|&h| rank_of(&ctx, h) == 3));
        // The host weight keeps its full shape before padding.
        assert_eq!(ctx.network().tensor(ctx.handle(&w).unwrap()).unwrap().shape, Shape::matrix(4, 5));
    }

    #[test]
    fn test_normalize_without_handles_uses_host_rank() {
        let mut ctx = ConversionContext::new();
        let w = Tensor::zeros(Shape::new(vec![2, 2, 2]), DType::F32);
        let args = [Arg::from(&w), Arg::Int(3)];
        let handles = ctx.normalize_operands("mul", &[&args[0], &args[1]]).unwrap();
        assert_eq!(rank_of(&ctx, handles[1]), 3);
    }
}
