// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device placement tags for tensors.

use std::fmt;

/// Where a tensor's storage logically lives.
///
/// All storage is host memory in this crate; the tag decides which
/// location an inference engine binds the buffer to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator memory with the given ordinal.
    Gpu(usize),
    /// Shape-only placeholder with no backing data.
    Meta,
}

impl Device {
    /// Returns the device family name (`"cpu"`, `"gpu"`, `"meta"`).
    pub fn kind(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Gpu(_) => "gpu",
            Device::Meta => "meta",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Gpu(ordinal) => write!(f, "gpu:{ordinal}"),
            other => f.write_str(other.kind()),
        }
    }
}
