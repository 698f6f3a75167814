// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::Shape;

/// Errors that can occur during tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("shape mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype:?} for operation {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },

    /// A numeric computation failed (e.g., NaN or overflow).
    #[error("numeric error in {op}: {detail}")]
    Numeric {
        op: &'static str,
        detail: String,
    },

    /// An operator received arguments it cannot interpret.
    #[error("invalid argument for {op}: {detail}")]
    InvalidArgument { op: String, detail: String },

    /// No operator is registered under the requested path.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// Work submitted to a stream failed when the stream was drained.
    #[error("stream {stream} task failed: {detail}")]
    Stream { stream: u64, detail: String },

    /// Reading or writing persisted state failed.
    #[error("state persistence error: {0}")]
    Persistence(String),

    /// Code outside this crate (an installed interceptor, a compiled
    /// module's backend) failed.
    ///
    /// Callers that know the boxed error's type can recover it with `downcast`.
    #[error("external failure: {0}")]
    External(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TensorError {
    /// Shorthand for [`TensorError::InvalidArgument`].
    pub fn invalid_argument(op: impl Into<String>, detail: impl Into<String>) -> Self {
        TensorError::InvalidArgument {
            op: op.into(),
            detail: detail.into(),
        }
    }
}
