// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise arithmetic and activations.

use super::kernels::{broadcast_binary, sigmoid_scalar};
use super::{call_single, map_elements};
use crate::dispatch::{Arg, OpArgs};
use crate::{DType, Shape, Tensor, TensorError};

/// Element type of a binary result.
///
/// Floating operands win over integer ones; a fractional scalar promotes an
/// integer tensor to `F32`.
fn result_dtype(lhs: &Arg, rhs: &Arg) -> Option<DType> {
    let scalar_is_fractional = |a: &Arg| matches!(a, Arg::Scalar(v) if v.fract() != 0.0);
    match (lhs.as_tensor(), rhs.as_tensor()) {
        (Some(a), Some(b)) if !a.dtype().is_floating() && b.dtype().is_floating() => Some(b.dtype()),
        (Some(a), _) if !a.dtype().is_floating() && scalar_is_fractional(rhs) => Some(DType::F32),
        (Some(a), _) => Some(a.dtype()),
        (None, Some(b)) if !b.dtype().is_floating() && scalar_is_fractional(lhs) => Some(DType::F32),
        (None, Some(b)) => Some(b.dtype()),
        (None, None) => None,
    }
}

fn operand(op: &'static str, arg: &Arg) -> Result<(Vec<f32>, Shape), TensorError> {
    match arg {
        Arg::Tensor(t) => Ok((t.to_f32_vec(), t.shape().clone())),
        other => other
            .as_f64()
            .map(|v| (vec![v as f32], Shape::scalar()))
            .ok_or_else(|| {
                TensorError::invalid_argument(op, format!("unsupported operand {}", other.describe()))
            }),
    }
}

fn binary(op: &'static str, args: &OpArgs, f: fn(f32, f32) -> f32) -> Result<Tensor, TensorError> {
    let missing = || TensorError::invalid_argument(op, "expected two operands");
    let lhs = args.get("input", 0).ok_or_else(missing)?;
    let rhs = args.get("other", 1).ok_or_else(missing)?;
    let dtype = result_dtype(lhs, rhs)
        .ok_or_else(|| TensorError::invalid_argument(op, "at least one operand must be a tensor"))?;
    let device = lhs
        .as_tensor()
        .or_else(|| rhs.as_tensor())
        .map(Tensor::device)
        .unwrap_or_default();

    let (a, a_shape) = operand(op, lhs)?;
    let (b, b_shape) = operand(op, rhs)?;
    let (out, shape) = broadcast_binary(op, &a, &a_shape, &b, &b_shape, f)?;
    Ok(Tensor::from_values(shape, dtype, &out)?.placed_on(device))
}

pub(super) fn add_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    binary("add", args, |a, b| a + b)
}

pub(super) fn sub_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    binary("sub", args, |a, b| a - b)
}

pub(super) fn mul_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    binary("mul", args, |a, b| a * b)
}

pub(super) fn div_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    binary("div", args, |a, b| a / b)
}

fn unary(op: &'static str, args: &OpArgs, f: fn(f32) -> f32) -> Result<Tensor, TensorError> {
    map_elements(args.tensor(op, "input", 0)?, f)
}

pub(super) fn relu_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    unary("relu", args, |x| x.max(0.0))
}

pub(super) fn sigmoid_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    unary("sigmoid", args, sigmoid_scalar)
}

pub(super) fn tanh_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    unary("tanh", args, f32::tanh)
}

pub(super) fn exp_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    unary("exp", args, f32::exp)
}

pub(super) fn sqrt_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    unary("sqrt", args, f32::sqrt)
}

/// `x * sigmoid(x)`, expressed through the table's `sigmoid` and `mul`.
pub(super) fn silu_kernel(args: &OpArgs) -> Result<Tensor, TensorError> {
    let input = args.tensor("silu", "input", 0)?;
    mul(input, sigmoid(input)?)
}

/// Element-wise `input + other` with broadcasting. Either side may be a scalar.
pub fn add(input: impl Into<Arg>, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
    call_single("ops.add", OpArgs::new().with(input).with(other))
}

/// Element-wise `input - other` with broadcasting.
pub fn sub(input: impl Into<Arg>, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
    call_single("ops.sub", OpArgs::new().with(input).with(other))
}

/// Element-wise `input * other` with broadcasting.
pub fn mul(input: impl Into<Arg>, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
    call_single("ops.mul", OpArgs::new().with(input).with(other))
}

/// Element-wise `input / other` with broadcasting.
pub fn div(input: impl Into<Arg>, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
    call_single("ops.div", OpArgs::new().with(input).with(other))
}

pub fn relu(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.relu", OpArgs::new().with(input))
}

pub fn sigmoid(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.sigmoid", OpArgs::new().with(input))
}

pub fn tanh(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.tanh", OpArgs::new().with(input))
}

pub fn exp(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.exp", OpArgs::new().with(input))
}

pub fn sqrt(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.sqrt", OpArgs::new().with(input))
}

/// Sigmoid-weighted linear unit.
pub fn silu(input: &Tensor) -> Result<Tensor, TensorError> {
    call_single("ops.nn.silu", OpArgs::new().with(input))
}

#[allow(clippy::should_implement_trait)]
impl Tensor {
    /// Method form of [`add`].
    pub fn add(&self, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
        call_single("ops.Tensor.add", OpArgs::new().with(self).with(other))
    }

    /// Method form of [`mul`].
    pub fn mul(&self, other: impl Into<Arg>) -> Result<Tensor, TensorError> {
        call_single("ops.Tensor.mul", OpArgs::new().with(self).with(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;

    fn t(shape: Shape, values: &[f32]) -> Tensor {
        Tensor::from_f32(shape, values).unwrap()
    }

    #[test]
    fn test_add_same_shape() {
        let a = t(Shape::vector(3), &[1.0, 2.0, 3.0]);
        let b = t(Shape::vector(3), &[10.0, 20.0, 30.0]);
        assert_eq!(add(&a, &b).unwrap().to_f32_vec(), vec![11.0, 22.0, 33.0]);
        assert_eq!(a.add(&b).unwrap().to_f32_vec(), vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn test_scalar_operands() {
        let a = t(Shape::vector(2), &[1.0, 2.0]);
        assert_eq!(add(&a, 2.5).unwrap().to_f32_vec(), vec![3.5, 4.5]);
        assert_eq!(sub(10.0, &a).unwrap().to_f32_vec(), vec![9.0, 8.0]);
        assert_eq!(a.mul(3.0).unwrap().to_f32_vec(), vec![3.0, 6.0]);
        assert_eq!(div(&a, 2.0).unwrap().to_f32_vec(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_scalar_only_is_rejected() {
        assert!(add(1.0, 2.0).is_err());
    }

    #[test]
    fn test_integer_promotion() {
        let ints = Tensor::full(Shape::vector(2), DType::I32, 1.0);
        assert_eq!(add(&ints, 2.0).unwrap().dtype(), DType::I32);
        assert_eq!(add(&ints, 0.5).unwrap().dtype(), DType::F32);
        let floats = Tensor::full(Shape::vector(2), DType::F16, 1.0);
        assert_eq!(add(&ints, &floats).unwrap().dtype(), DType::F16);
    }

    #[test]
    fn test_output_keeps_device() {
        let a = Tensor::full(Shape::vector(2), DType::F32, 1.0).to_device(Device::Gpu(0));
        assert_eq!(relu(&a).unwrap().device(), Device::Gpu(0));
        assert_eq!(add(&a, 1.0).unwrap().device(), Device::Gpu(0));
    }

    #[test]
    fn test_activations() {
        let x = t(Shape::vector(3), &[-1.0, 0.0, 2.0]);
        assert_eq!(relu(&x).unwrap().to_f32_vec(), vec![0.0, 0.0, 2.0]);
        let s = sigmoid(&x).unwrap().to_f32_vec();
        assert!((s[1] - 0.5).abs() < 1e-6);
        let y = silu(&x).unwrap().to_f32_vec();
        assert!((y[2] - 2.0 * sigmoid_scalar(2.0)).abs() < 1e-6);
        assert!((sqrt(&t(Shape::vector(1), &[9.0])).unwrap().to_f32_vec()[0] - 3.0).abs() < 1e-6);
    }
}
