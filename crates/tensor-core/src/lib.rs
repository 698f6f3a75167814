// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! A small eager tensor framework whose operators are looked up at call time.
//!
//! This crate provides:
//! - [`Tensor`]: an n-dimensional tensor with identity and shared storage.
//! - [`Shape`], [`DType`], [`Device`]: shape, element type and placement.
//! - [`ops`]: element-wise arithmetic, activations, matmul, softmax,
//!   reductions, reshapes and normalisation, each dispatched through the
//!   per-thread operator table in [`dispatch`].
//! - [`Module`] and [`StateDict`]: forward passes and SafeTensors-backed
//!   persistent state.
//! - [`Stream`]: an ordered queue of deferred work.
//!
//! # Design Goals
//! - Every operator call is observable: replacing a table entry redirects
//!   all callers, including composite operators calling primitives.
//! - Clean error types via `thiserror`.

mod device;
pub mod dispatch;
mod dtype;
mod error;
mod module;
pub mod ops;
mod shape;
mod state;
mod stream;
mod tensor;

pub use device::Device;
pub use dispatch::{Arg, OpArgs, OpOutput};
pub use dtype::DType;
pub use error::TensorError;
pub use module::{FnModule, Module, ModuleOutput};
pub use shape::Shape;
pub use state::{StateDict, StateValue};
pub use stream::{current_stream, set_current_stream, Stream, TaskError};
pub use tensor::{DataPtr, Tensor, TensorId};
