// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shape manipulation: reshape, transpose, contiguous.

use super::call_single;
use super::kernels::permute;
use crate::dispatch::{Arg, OpArgs};
use crate::{Shape, Tensor, TensorError};

/// Resolves a requested shape that may contain a single `-1`.
pub(crate) fn infer_shape(requested: &[i64], num_elements: usize) -> Result<Shape, TensorError> {
    let bad = |detail: String| TensorError::invalid_argument("reshape", detail);
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &d) in requested.iter().enumerate() {
        match d {
            -1 if inferred.is_none() => inferred = Some(i),
            -1 => return Err(bad("only one dimension can be inferred".into())),
            d if d < 0 => return Err(bad(format!("invalid dimension {d}"))),
            d => known *= d as usize,
        }
    }
    let mut dims: Vec<usize> = requested.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || num_elements % known != 0 {
            return Err(bad(format!("cannot infer {requested:?} from {num_elements} elements")));
        }
        dims[i] = num_elements / known;
    }
    let shape = Shape::new(dims);
    if shape.num_elements() != num_elements {
        return Err(bad(format!("shape {shape} is invalid for {num_elements} elements")));
    }
    Ok(shape)
}

pub(super) fn reshape_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("reshape", "input", 0)?;
    let requested = args
        .get("shape", 1)
        .and_then(Arg::as_ints)
        .ok_or_else(|| TensorError::invalid_argument("reshape", "'shape' must be a list of ints"))?;
    input.view_as(infer_shape(&requested, input.shape().num_elements())?)
}

pub(super) fn transpose_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("transpose", "input", 0)?;
    let dim = |name: &str, pos: usize| -> Result<usize, TensorError> {
        args.get(name, pos)
            .and_then(Arg::as_i64)
            .and_then(|d| input.shape().resolve_dim(d))
            .ok_or_else(|| TensorError::invalid_argument("transpose", format!("invalid '{name}'")))
    };
    let (d0, d1) = (dim("dim0", 1)?, dim("dim1", 2)?);
    let mut perm: Vec<usize> = (0..input.rank()).collect();
    perm.swap(d0, d1);
    let (out, shape) = permute(&input.to_f32_vec(), input.shape(), &perm);
    Ok(Tensor::from_values(shape, input.dtype(), &out)?.placed_on(input.device()))
}

/// Tensors are always densely packed, so this returns the input itself.
pub(super) fn contiguous_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    Ok(args.tensor("contiguous", "input", 0)?.clone())
}

/// Returns a tensor with the same data viewed under `shape`.
///
/// One entry may be `-1`, in which case it is inferred.
pub fn reshape(input: &Tensor, shape: &[i64]) -> Result<Tensor, TensorError> {
    call_single("ops.reshape", OpArgs::new().with(input).with(shape))
}

/// Swaps dimensions `dim0` and `dim1`.
pub fn transpose(input: &Tensor, dim0: i64, dim1: i64) -> Result<Tensor, TensorError> {
    call_single("ops.transpose", OpArgs::new().with(input).with(dim0).with(dim1))
}

impl Tensor {
    /// Method form of [`reshape`].
    pub fn reshape(&self, shape: &[i64]) -> Result<Tensor, TensorError> {
        call_single("ops.Tensor.reshape", OpArgs::new().with(self).with(shape))
    }

    /// Returns a densely packed tensor with the same contents.
    pub fn contiguous(&self) -> Result<Tensor, TensorError> {
        call_single("ops.Tensor.contiguous", OpArgs::new().with(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_shape() {
        assert_eq!(infer_shape(&[2, -1], 6).unwrap(), Shape::matrix(2, 3));
        assert!(infer_shape(&[-1, -1], 6).is_err());
        assert!(infer_shape(&[4, -1], 6).is_err());
        assert!(infer_shape(&[2, 2], 6).is_err());
    }

    #[test]
    fn test_reshape_shares_storage() {
        let x = Tensor::from_f32(Shape::vector(6), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let y = x.reshape(&[3, -1]).unwrap();
        assert_eq!(y.shape(), &Shape::matrix(3, 2));
        assert!(x.data_ptr().same_buffer(&y.data_ptr()));
        assert_ne!(x.id(), y.id());
    }

    #[test]
    fn test_transpose_negative_dims() {
        let x = Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let y = transpose(&x, -1, -2).unwrap();
        assert_eq!(y.shape(), &Shape::matrix(3, 2));
        assert_eq!(y.to_f32_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_contiguous_is_identity() {
        let x = Tensor::zeros(Shape::vector(2), crate::DType::F32);
        assert_eq!(x.contiguous().unwrap().id(), x.id());
    }
}
