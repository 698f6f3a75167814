// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer normalization.

use super::{add, call_single, div, mean, mul, sqrt, sub};
use crate::dispatch::{Arg, OpArgs};
use crate::{Tensor, TensorError};

/// Default epsilon, matching common framework defaults.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Normalises over the trailing `normalized_shape` dimensions, then applies
/// the optional affine parameters:
///
/// `output = weight * (x - mean) / sqrt(var + eps) + bias`
///
/// Built from primitive operators (`mean`, `sub`, `mul`, `add`, `sqrt`,
/// `div`) so each step goes through the operator table.
pub(super) fn layer_norm_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("layer_norm", "input", 0)?;
    let normalized = args
        .get("normalized_shape", 1)
        .and_then(Arg::as_ints)
        .ok_or_else(|| TensorError::invalid_argument("layer_norm", "'normalized_shape' must be a list of ints"))?;
    let weight = args.get("weight", 2).and_then(Arg::as_tensor);
    let bias = args.get("bias", 3).and_then(Arg::as_tensor);
    let eps = args.get("eps", 4).and_then(Arg::as_f64).unwrap_or(DEFAULT_EPS);

    let rank = input.rank();
    let trailing = &input.shape().dims()[rank.saturating_sub(normalized.len())..];
    if normalized.len() > rank || normalized.iter().zip(trailing).any(|(&n, &d)| n as usize != d) {
        return Err(TensorError::invalid_argument(
            "layer_norm",
            format!("normalized_shape {normalized:?} does not match input {}", input.shape()),
        ));
    }
    let dims: Vec<i64> = (rank - normalized.len()..rank).map(|d| d as i64).collect();

    let centered = sub(input, mean(input, &dims, true)?)?;
    let var = mean(&mul(&centered, &centered)?, &dims, true)?;
    let mut out = div(&centered, sqrt(&add(&var, eps)?)?)?;
    if let Some(weight) = weight {
        out = mul(&out, weight)?;
    }
    if let Some(bias) = bias {
        out = add(&out, bias)?;
    }
    Ok(out)
}

/// Layer normalization over the trailing `normalized_shape` dimensions.
pub fn layer_norm(
    input: &Tensor,
    normalized_shape: &[i64],
    weight: Option<&Tensor>,
    bias: Option<&Tensor>,
    eps: f64,
) -> Result<Tensor, TensorError> {
    call_single(
        "ops.nn.layer_norm",
        OpArgs::new()
            .with(input)
            .with(normalized_shape)
            .with(weight)
            .with(bias)
            .with(eps),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let input = Tensor::from_f32(Shape::new(vec![1, 4]), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = layer_norm(&input, &[4], None, None, DEFAULT_EPS).unwrap().to_f32_vec();
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5, "mean should be ≈ 0, got {mean}");
        assert!((var - 1.0).abs() < 1e-3, "var should be ≈ 1, got {var}");
    }

    #[test]
    fn test_layer_norm_affine() {
        let input = Tensor::from_f32(Shape::vector(4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let gamma = Tensor::from_f32(Shape::vector(4), &[2.0; 4]).unwrap();
        let beta = Tensor::from_f32(Shape::vector(4), &[1.0; 4]).unwrap();
        let out = layer_norm(&input, &[4], Some(&gamma), Some(&beta), DEFAULT_EPS)
            .unwrap()
            .to_f32_vec();
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        assert!((mean - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_layer_norm_shape_mismatch() {
        let input = Tensor::from_f32(Shape::vector(4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(layer_norm(&input, &[3], None, None, DEFAULT_EPS).is_err());
    }
}
