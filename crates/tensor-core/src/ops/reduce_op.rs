// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reductions.

use super::call_single;
use super::kernels::reduce_mean;
use crate::dispatch::{Arg, OpArgs};
use crate::{Tensor, TensorError};

pub(super) fn mean_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("mean", "input", 0)?;
    let keep_dims = args.get("keepdim", 2).and_then(Arg::as_bool).unwrap_or(false);
    let axes: Vec<usize> = match args.get("dim", 1).and_then(Arg::as_ints) {
        Some(dims) => dims
            .iter()
            .map(|&d| {
                input.shape().resolve_dim(d).ok_or_else(|| {
                    TensorError::invalid_argument("mean", format!("dim {d} out of range for {}", input.shape()))
                })
            })
            .collect::<Result<_, _>>()?,
        None => (0..input.rank()).collect(),
    };
    let (out, shape) = reduce_mean(&input.to_f32_vec(), input.shape(), &axes, keep_dims);
    Ok(Tensor::from_values(shape, input.dtype(), &out)?.placed_on(input.device()))
}

/// Mean over `dims` (all dimensions when empty).
pub fn mean(input: &Tensor, dims: &[i64], keepdim: bool) -> Result<Tensor, TensorError> {
    let mut args = OpArgs::new().with(input);
    if !dims.is_empty() {
        args = args.with_named("dim", dims);
    }
    call_single("ops.mean", args.with_named("keepdim", keepdim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn test_mean_last_dim_keepdim() {
        let x = Tensor::from_f32(Shape::matrix(2, 2), &[1.0, 3.0, 5.0, 7.0]).unwrap();
        let m = mean(&x, &[-1], true).unwrap();
        assert_eq!(m.shape(), &Shape::matrix(2, 1));
        assert_eq!(m.to_f32_vec(), vec![2.0, 6.0]);
    }

    #[test]
    fn test_mean_all() {
        let x = Tensor::from_f32(Shape::matrix(2, 2), &[1.0, 3.0, 5.0, 7.0]).unwrap();
        let m = mean(&x, &[], false).unwrap();
        assert_eq!(m.shape(), &Shape::scalar());
        assert_eq!(m.to_f32_vec(), vec![4.0]);
    }
}
