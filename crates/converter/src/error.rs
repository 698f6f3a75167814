// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for module conversion.

use network_ir::{EngineError, NetworkError};
use tensor_core::{DType, Device, TensorError};

/// Errors that can occur while tracing, converting or running a module.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A traced value came from an operation with no conversion rule.
    #[error("unsupported operation '{0}': no conversion rule is registered")]
    UnsupportedOperation(String),

    /// No operand of a call carries an element type.
    #[error("cannot infer element type for {op}: no tensor operand")]
    TypeInference { op: String },

    /// Operands of one call have different element types.
    #[error("element type mismatch in {op}: {expected} vs {found}")]
    TypeMismatch { op: String, expected: DType, found: DType },

    /// A host element type has no counterpart in the network.
    #[error("element type {0} is not supported by the network")]
    UnsupportedDType(DType),

    /// A host device has no counterpart tensor location.
    #[error("device {0} is not supported by the network")]
    UnsupportedDevice(Device),

    /// The operation record was read outside a conversion rule.
    #[error("operation record accessed outside of a conversion rule")]
    StaleContext,

    /// A tensor needed in the network was never given a handle.
    #[error("tensor '{0}' has no network handle")]
    MissingHandle(String),

    /// A trace was started while another one is active on this thread.
    #[error("a conversion trace is already active on this thread")]
    NestedTrace,

    /// Arguments to a conversion rule or to the driver are unusable.
    #[error("invalid argument for {op}: {detail}")]
    InvalidArgument { op: String, detail: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The host framework failed.
    #[error("host framework error: {0}")]
    Tensor(#[from] TensorError),

    /// Building the network failed.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// The engine builder or runtime failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ConvertError {
    pub(crate) fn invalid_argument(op: impl Into<String>, detail: impl Into<String>) -> Self {
        ConvertError::InvalidArgument {
            op: op.into(),
            detail: detail.into(),
        }
    }

    /// Recovers a conversion error that travelled through a host call.
    ///
    /// Interceptors report failures as [`TensorError::External`]; this
    /// unwraps them so callers see the original error.
    pub fn from_host(err: TensorError) -> Self {
        match err {
            TensorError::External(inner) => match inner.downcast::<ConvertError>() {
                Ok(convert) => *convert,
                Err(other) => ConvertError::Tensor(TensorError::External(other)),
            },
            other => ConvertError::Tensor(other),
        }
    }
}
