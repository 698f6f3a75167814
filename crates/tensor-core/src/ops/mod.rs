// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor operations.
//!
//! Every function here is a front for an entry in the operator table
//! ([`crate::dispatch`]): it packs its arguments into [`OpArgs`], calls
//! whatever kernel is currently installed under its path, and unpacks the
//! result. Composite operations (`linear`, `layer_norm`, `silu`) are built
//! from other fronts, so their primitive calls go through the table too.

mod elementwise;
mod gelu_op;
pub mod kernels;
mod layer_norm_op;
mod matmul_op;
mod reduce_op;
mod shape_op;
mod softmax_op;

use crate::dispatch::{self, KernelRef, OpArgs, OpOutput};
use crate::{Tensor, TensorError};
use std::rc::Rc;

pub use elementwise::{add, div, exp, mul, relu, sigmoid, sqrt, sub, tanh};
pub use matmul_op::matmul;
pub use reduce_op::mean;
pub use shape_op::{reshape, transpose};

/// Neural-network operations (the `ops.nn` namespace).
pub mod nn {
    pub use super::elementwise::silu;
    pub use super::gelu_op::gelu;
    pub use super::layer_norm_op::layer_norm;
    pub use super::matmul_op::linear;
    pub use super::softmax_op::softmax;
}

/// Calls `path` and expects a single tensor back.
fn call_single(path: &str, args: OpArgs) -> Result<Tensor, TensorError> {
    dispatch::call(path, args)?.into_tensor()
}

/// Wraps a tensor-returning kernel function for the table.
fn kernel(f: fn(&OpArgs) -> Result<Tensor, TensorError>) -> KernelRef {
    Rc::new(move |args: &OpArgs| f(args).map(OpOutput::Tensor))
}

/// Applies `f` to every element, keeping shape, dtype and device.
fn map_elements(input: &Tensor, f: impl Fn(f32) -> f32) -> Result<Tensor, TensorError> {
    let values: Vec<f32> = input.to_f32_vec().into_iter().map(f).collect();
    Ok(Tensor::from_values(input.shape().clone(), input.dtype(), &values)?.placed_on(input.device()))
}

/// The kernels installed in a fresh operator table.
pub(crate) fn builtin_kernels() -> Vec<(&'static str, &'static str, KernelRef)> {
    vec![
        ("ops", "add", kernel(elementwise::add_kernel)),
        ("ops", "sub", kernel(elementwise::sub_kernel)),
        ("ops", "mul", kernel(elementwise::mul_kernel)),
        ("ops", "div", kernel(elementwise::div_kernel)),
        ("ops", "Tensor.add", kernel(elementwise::add_kernel)),
        ("ops", "Tensor.mul", kernel(elementwise::mul_kernel)),
        ("ops", "relu", kernel(elementwise::relu_kernel)),
        ("ops", "sigmoid", kernel(elementwise::sigmoid_kernel)),
        ("ops", "tanh", kernel(elementwise::tanh_kernel)),
        ("ops", "exp", kernel(elementwise::exp_kernel)),
        ("ops", "sqrt", kernel(elementwise::sqrt_kernel)),
        ("ops", "matmul", kernel(matmul_op::matmul_kernel)),
        ("ops", "mean", kernel(reduce_op::mean_kernel)),
        ("ops", "reshape", kernel(shape_op::reshape_kernel)),
        ("ops", "Tensor.reshape", kernel(shape_op::reshape_kernel)),
        ("ops", "transpose", kernel(shape_op::transpose_kernel)),
        ("ops", "Tensor.contiguous", kernel(shape_op::contiguous_kernel)),
        ("ops.nn", "gelu", kernel(gelu_op::gelu_kernel)),
        ("ops.nn", "silu", kernel(elementwise::silu_kernel)),
        ("ops.nn", "softmax", kernel(softmax_op::softmax_kernel)),
        ("ops.nn", "linear", kernel(matmul_op::linear_kernel)),
        ("ops.nn", "layer_norm", kernel(layer_norm_op::layer_norm_kernel)),
    ]
}
