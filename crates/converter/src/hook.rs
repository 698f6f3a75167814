// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Interception hooks installed in the operator table during a trace.
//!
//! An [`Interceptor`] stands in for a registered operator. It always runs
//! the original kernel and returns its result untouched; when no enclosing
//! real operation holds the [`ReentrancyLock`], it then hands the call to
//! the operator's conversion rule. A [`Sentinel`] stands in for every other
//! operator and only remembers which tensors were produced without a rule,
//! so that using one later can be reported as an unsupported operation.

use crate::context::{ConversionContext, OpRecord};
use crate::registry::Registration;
use crate::ConvertError;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tensor_core::dispatch::{Kernel, KernelRef, OpArgs, OpOutput};
use tensor_core::TensorError;

/// Suppresses conversion of calls nested inside a real operation.
#[derive(Debug, Default)]
pub struct ReentrancyLock {
    held: Cell<bool>,
}

impl ReentrancyLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.get()
    }

    /// Claims the right to convert the current call.
    ///
    /// Returns `None` while another call holds the lock. A `real` call takes
    /// the lock until the returned token drops; a composite call converts
    /// without taking it, so its internal calls are converted too.
    pub fn enter(&self, real: bool) -> Option<LockToken<'_>> {
        if self.held.get() {
            return None;
        }
        if real {
            self.held.set(true);
        }
        Some(LockToken {
            lock: self,
            acquired: real,
        })
    }
}

/// Proof that the holder may convert its call. Releases the lock on drop.
#[derive(Debug)]
pub struct LockToken<'a> {
    lock: &'a ReentrancyLock,
    acquired: bool,
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.lock.held.set(false);
        }
    }
}

/// State shared by every hook of one trace.
#[derive(Debug, Default)]
pub(crate) struct TraceShared {
    pub(crate) lock: ReentrancyLock,
    pub(crate) ctx: RefCell<ConversionContext>,
}

/// Hook for an operator with a conversion rule.
pub(crate) struct Interceptor {
    registration: Registration,
    shared: Rc<TraceShared>,
}

impl Interceptor {
    pub(crate) fn new(registration: Registration, shared: Rc<TraceShared>) -> Self {
        Self { registration, shared }
    }

    fn convert(&self, args: &OpArgs, output: &OpOutput) -> Result<(), ConvertError> {
        let path = self.registration.path();
        let mut ctx = self.shared.ctx.try_borrow_mut().map_err(|_| {
            ConvertError::invalid_argument(&path, "conversion rule called back into a traced operator")
        })?;
        let first_layer = ctx.network().num_layers();
        ctx.begin_record(OpRecord::new(path.clone(), args.clone(), output.clone()));
        let result = self.registration.rule().convert(&mut *ctx);
        let record = ctx.end_record();
        if let Some(record) = record {
            ctx.name_layers_from(first_layer, &record.describe());
        }
        tracing::debug!(
            op = %path,
            layers = ctx.network().num_layers() - first_layer,
            ok = result.is_ok(),
            "converted call"
        );
        result
    }
}

impl Kernel for Interceptor {
    fn call(&self, args: &OpArgs) -> Result<OpOutput, TensorError> {
        let Some(_token) = self.shared.lock.enter(self.registration.is_real()) else {
            return self.registration.original().call(args);
        };
        let output = self.registration.original().call(args)?;
        self.convert(args, &output)
            .map_err(|e| TensorError::External(Box::new(e)))?;
        Ok(output)
    }
}

/// Hook for an operator without a conversion rule.
pub(crate) struct Sentinel {
    path: String,
    original: KernelRef,
    shared: Rc<TraceShared>,
}

impl Sentinel {
    pub(crate) fn new(path: String, original: KernelRef, shared: Rc<TraceShared>) -> Self {
        Self { path, original, shared }
    }
}

impl Kernel for Sentinel {
    fn call(&self, args: &OpArgs) -> Result<OpOutput, TensorError> {
        let suppressed = self.shared.lock.is_held();
        let output = self.original.call(args)?;
        if !suppressed {
            if let Ok(mut ctx) = self.shared.ctx.try_borrow_mut() {
                for tensor in output.tensors() {
                    ctx.note_untraced(tensor, &self.path);
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_call_holds_lock() {
        let lock = ReentrancyLock::new();
        {
            let token = lock.enter(true);
            assert!(token.is_some());
            assert!(lock.is_held());
            assert!(lock.enter(true).is_none());
            assert!(lock.enter(false).is_none());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_composite_call_leaves_lock_free() {
        let lock = ReentrancyLock::new();
        let outer = lock.enter(false);
        assert!(outer.is_some());
        assert!(!lock.is_held());
        let inner = lock.enter(true);
        assert!(inner.is_some());
        drop(inner);
        drop(outer);
        assert!(!lock.is_held());
    }
}
