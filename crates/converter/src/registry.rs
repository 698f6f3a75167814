// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Converter registry.
//!
//! A registration binds an operator path in the host table to a
//! [`ConversionRule`]. The kernel installed at that path is captured when
//! the rule is registered, so tracing can later restore exactly that
//! kernel. Paths that do not resolve in the running table are skipped with
//! a debug message; a missing operator only disables its own rule.

use crate::context::ConversionContext;
use crate::ConvertError;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tensor_core::dispatch::{self, KernelRef, OpLocation};

/// Translates one intercepted call into network layers.
///
/// The rule reads the call from [`ConversionContext::record`] and attaches
/// handles to the call's output tensors.
pub trait ConversionRule {
    fn convert(&self, ctx: &mut ConversionContext) -> Result<(), ConvertError>;
}

impl<F> ConversionRule for F
where
    F: Fn(&mut ConversionContext) -> Result<(), ConvertError>,
{
    fn convert(&self, ctx: &mut ConversionContext) -> Result<(), ConvertError> {
        self(ctx)
    }
}

/// One operator's rule plus the kernel it was registered against.
#[derive(Clone)]
pub struct Registration {
    location: OpLocation,
    rule: Rc<dyn ConversionRule>,
    is_real: bool,
    original: KernelRef,
}

impl Registration {
    pub fn location(&self) -> &OpLocation {
        &self.location
    }

    pub fn path(&self) -> String {
        self.location.path()
    }

    /// Real operations lock out conversion of the calls they make internally.
    pub fn is_real(&self) -> bool {
        self.is_real
    }

    pub fn rule(&self) -> &dyn ConversionRule {
        self.rule.as_ref()
    }

    /// The kernel that was installed when the rule was registered.
    pub fn original(&self) -> &KernelRef {
        &self.original
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("location", &self.location)
            .field("is_real", &self.is_real)
            .finish()
    }
}

/// Operator path → conversion rule.
#[derive(Debug, Default, Clone)]
pub struct ConverterRegistry {
    registrations: BTreeMap<String, Registration>,
}

impl ConverterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in rule.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::converters::register_builtin(&mut registry);
        registry
    }

    /// Registers `rule` for the operator at `path`.
    ///
    /// Returns `false` when the registration was skipped, either because it
    /// is disabled or because `path` names no operator in this thread's
    /// table. A later registration for the same path replaces an earlier one.
    pub fn register(
        &mut self,
        path: &str,
        rule: impl ConversionRule + 'static,
        is_real: bool,
        enabled: bool,
    ) -> bool {
        if !enabled {
            tracing::debug!(path, "conversion rule disabled");
            return false;
        }
        let Some(location) = dispatch::resolve(path) else {
            tracing::debug!(path, "skipping conversion rule: no such namespace");
            return false;
        };
        let Some(original) = dispatch::lookup(&location) else {
            tracing::debug!(path, "skipping conversion rule: no such operator");
            return false;
        };
        let registration = Registration {
            location,
            rule: Rc::new(rule),
            is_real,
            original,
        };
        self.registrations.insert(registration.path(), registration);
        true
    }

    pub fn get(&self, path: &str) -> Option<&Registration> {
        self.registrations.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.registrations.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.registrations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut ConversionContext) -> Result<(), ConvertError> {
        Ok(())
    }

    #[test]
    fn test_register_resolves_nested_paths() {
        let mut registry = ConverterRegistry::new();
        assert!(registry.register("ops.Tensor.add", noop, true, true));
        assert!(registry.register("ops.nn.gelu", noop, true, true));
        let reg = registry.get("ops.Tensor.add").unwrap();
        assert_eq!(reg.location().namespace(), "ops");
        assert_eq!(reg.location().attr(), "Tensor.add");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unresolvable_paths_are_skipped() {
        let mut registry = ConverterRegistry::new();
        assert!(!registry.register("ops.does_not_exist", noop, true, true));
        assert!(!registry.register("vision.ops.nms", noop, true, true));
        assert!(!registry.register("ops.relu", noop, true, false));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_captures_current_kernel() {
        let mut registry = ConverterRegistry::new();
        registry.register("ops.relu", noop, true, true);
        let current = dispatch::lookup(&dispatch::resolve("ops.relu").unwrap()).unwrap();
        assert!(Rc::ptr_eq(registry.get("ops.relu").unwrap().original(), &current));
    }

    #[test]
    fn test_builtin_covers_core_ops() {
        let registry = ConverterRegistry::builtin();
        for path in ["ops.add", "ops.Tensor.mul", "ops.nn.linear", "ops.nn.layer_norm", "ops.nn.silu"] {
            assert!(registry.contains(path), "missing {path}");
        }
        assert!(!registry.get("ops.nn.silu").unwrap().is_real());
    }
}
