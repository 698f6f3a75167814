// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax activation operation.

use super::call_single;
use super::kernels::softmax_axis;
use crate::dispatch::{Arg, OpArgs};
use crate::{Tensor, TensorError};

pub(super) fn softmax_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("softmax", "input", 0)?;
    if !input.dtype().is_floating() {
        return Err(TensorError::UnsupportedDType {
            op: "softmax",
            dtype: input.dtype(),
        });
    }
    let dim = args.get("dim", 1).and_then(Arg::as_i64).unwrap_or(-1);
    let values = if input.rank() == 0 {
        vec![1.0]
    } else {
        let axis = input.shape().resolve_dim(dim).ok_or_else(|| {
            TensorError::invalid_argument("softmax", format!("dim {dim} out of range for {}", input.shape()))
        })?;
        softmax_axis(&input.to_f32_vec(), input.shape(), axis)
    };
    Ok(Tensor::from_values(input.shape().clone(), input.dtype(), &values)?.placed_on(input.device()))
}

/// Computes softmax along `dim` (negative values count from the end).
///
/// Uses the numerically stable variant that subtracts the maximum value
/// before exponentiation.
pub fn softmax(input: &Tensor, dim: i64) -> Result<Tensor, TensorError> {
    call_single("ops.nn.softmax", OpArgs::new().with(input).with_named("dim", dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn test_softmax_uniform() {
        let input = Tensor::from_f32(Shape::vector(4), &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let r = softmax(&input, -1).unwrap().to_f32_vec();
        assert!(r.iter().all(|&x| (x - 0.25).abs() < 1e-5));
    }

    #[test]
    fn test_softmax_monotonic() {
        let input = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
        let r = softmax(&input, 0).unwrap().to_f32_vec();
        assert!(r[0] < r[1]);
        assert!(r[1] < r[2]);
    }

    #[test]
    fn test_softmax_dim_out_of_range() {
        let input = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
        assert!(softmax(&input, 2).is_err());
    }
}
