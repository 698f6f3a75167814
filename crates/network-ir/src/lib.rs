// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # network-ir
//!
//! A static network representation and the runtime that executes it.
//!
//! This crate provides:
//! - [`NetworkDefinition`]: typed layer construction with shape and dtype
//!   checks at insertion time. Shapes exclude the batch dimension.
//! - [`Builder`]: turns a network into an immutable [`Engine`], pruning
//!   unused layers and settling FP16/INT8 precision (with optional
//!   [`Calibrator`]-driven range estimation).
//! - [`ExecutionContext`]: runs an engine over caller-provided buffers,
//!   synchronously or queued on a [`tensor_core::Stream`].
//! - [`LayerProfiler`]: per-layer timing collected during execution.
//! - [`export`] / [`NetworkParser`]: a JSON graph exchange format.

mod builder;
mod calibrator;
mod engine;
mod error;
mod exchange;
mod execution;
mod network;
mod profiler;
mod types;

pub use builder::{Builder, BuilderConfig, BuilderFlag, Severity};
pub use calibrator::{decode_cache, encode_cache, CalibrationAlgorithm, Calibrator};
pub use engine::{Binding, Engine, Precision};
pub use error::{EngineError, NetworkError};
pub use exchange::{export, NetworkParser};
pub use execution::ExecutionContext;
pub use network::{Layer, LayerKind, LayerRef, NetworkDefinition, NetworkTensor, TensorRef, Weights};
pub use profiler::{LayerProfiler, LayerTiming};
pub use types::{axes_from_mask, ActivationType, DataType, ElementWiseOp, ReduceOp, TensorLocation, UnaryOp};
