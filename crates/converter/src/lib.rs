// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # converter
//!
//! Converts an eager [`tensor_core::Module`] into a compiled
//! [`network_ir::Engine`] by tracing one forward run.
//!
//! While a [`TraceScope`] is active every operator in the host table is
//! wrapped. Calls with a registered [`ConversionRule`] run the original
//! kernel and then the rule, which appends the equivalent layers to the
//! network; calls made inside a real operation are not converted again.
//! [`convert`] drives the whole procedure and returns a [`CompiledModule`]
//! that executes the engine on new batches and persists through the
//! module state dict.

mod calibration;
mod compiled;
mod config;
mod context;
mod converters;
pub mod dtype_map;
mod driver;
mod error;
mod handles;
mod hook;
mod normalize;
mod registry;

pub use calibration::{DatasetCalibrator, TensorBatchDataset};
pub use compiled::CompiledModule;
pub use config::{ConversionConfig, WorkspaceSize};
pub use context::{ConversionContext, OpRecord, TraceScope};
pub use driver::{convert, convert_with};
pub use error::ConvertError;
pub use handles::HandleMap;
pub use hook::{LockToken, ReentrancyLock};
pub use registry::{ConversionRule, ConverterRegistry, Registration};
