// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor → network handle association for one trace.
//!
//! Keyed by tensor identity, not contents: two tensors holding equal values
//! are distinct network values, while clones of one tensor (which share its
//! identity) share its handle.

use network_ir::TensorRef;
use std::collections::HashMap;
use tensor_core::{Tensor, TensorId};

#[derive(Debug, Default)]
pub struct HandleMap {
    handles: HashMap<TensorId, TensorRef>,
}

impl HandleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The network value currently producing `tensor`, if any.
    pub fn get(&self, tensor: &Tensor) -> Option<TensorRef> {
        self.handles.get(&tensor.id()).copied()
    }

    /// Associates `tensor` with `handle`, replacing any previous association.
    pub fn set(&mut self, tensor: &Tensor, handle: TensorRef) {
        self.handles.insert(tensor.id(), handle);
    }

    pub fn contains(&self, tensor: &Tensor) -> bool {
        self.handles.contains_key(&tensor.id())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
