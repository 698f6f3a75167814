// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Gaussian Error Linear Unit (GELU) activation.

use super::kernels::gelu_scalar;
use super::{call_single, map_elements};
use crate::dispatch::OpArgs;
use crate::{Tensor, TensorError};

pub(super) fn gelu_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("gelu", "input", 0)?;
    if !input.dtype().is_floating() {
        return Err(TensorError::UnsupportedDType {
            op: "gelu",
            dtype: input.dtype(),
        });
    }
    map_elements(input, gelu_scalar)
}

/// Applies GELU element-wise using the tanh approximation used by GPT-2 and
/// most transformer models.
///
/// # Errors
/// Returns [`TensorError::UnsupportedDType`] for integer tensors.
pub fn gelu(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.nn.gelu", OpArgs::new().with(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape};

    fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_gelu_tensor() {
        let input = Tensor::from_f32(Shape::vector(4), &[0.0, 1.0, -1.0, 2.0]).unwrap();
        let r = gelu(&input).unwrap().to_f32_vec();
        assert!(approx_eq(r[0], 0.0, 1e-5));
        assert!(approx_eq(r[1], 0.8412, 0.01));
        assert!(approx_eq(r[2], -0.1588, 0.01));
        assert!(approx_eq(r[3], 1.9545, 0.01));
    }

    #[test]
    fn test_gelu_rejects_integers() {
        let input = Tensor::zeros(Shape::vector(3), DType::I32);
        assert!(matches!(
            gelu(&input),
            Err(TensorError::UnsupportedDType { op: "gelu", .. })
        ));
    }
}
