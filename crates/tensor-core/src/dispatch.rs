// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator table.
//!
//! Every public operation in [`crate::ops`] is a thin front that looks its
//! kernel up here by dotted path (`"ops.add"`, `"ops.nn.gelu"`,
//! `"ops.Tensor.reshape"`) and calls it. The table is per thread and
//! organised into namespaces; an entry can be swapped with [`replace`] and
//! swapped back later, which is how interceptors observe calls without the
//! calling code knowing.

use crate::{Tensor, TensorError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// One argument of an operator call.
#[derive(Debug, Clone)]
pub enum Arg {
    Tensor(Tensor),
    Scalar(f64),
    Int(i64),
    Ints(Vec<i64>),
    Bool(bool),
    None,
}

impl Arg {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Arg::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Numeric value of a scalar or integer argument.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Scalar(v) => Some(*v),
            Arg::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer list; a single integer is promoted to a one-element list.
    pub fn as_ints(&self) -> Option<Vec<i64>> {
        match self {
            Arg::Ints(v) => Some(v.clone()),
            Arg::Int(v) => Some(vec![*v]),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Arg::None)
    }

    /// Short description used in logs and layer names.
    pub fn describe(&self) -> String {
        match self {
            Arg::Tensor(t) => format!("tensor(shape={}, dtype={})", t.shape(), t.dtype()),
            Arg::Scalar(v) => v.to_string(),
            Arg::Int(v) => v.to_string(),
            Arg::Ints(v) => format!("{v:?}"),
            Arg::Bool(v) => v.to_string(),
            Arg::None => "None".to_string(),
        }
    }
}

impl From<Tensor> for Arg {
    fn from(t: Tensor) -> Self {
        Arg::Tensor(t)
    }
}

impl From<&Tensor> for Arg {
    fn from(t: &Tensor) -> Self {
        Arg::Tensor(t.clone())
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Scalar(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Scalar(f64::from(v))
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<Vec<i64>> for Arg {
    fn from(v: Vec<i64>) -> Self {
        Arg::Ints(v)
    }
}

impl From<&[i64]> for Arg {
    fn from(v: &[i64]) -> Self {
        Arg::Ints(v.to_vec())
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<Option<&Tensor>> for Arg {
    fn from(t: Option<&Tensor>) -> Self {
        t.map_or(Arg::None, |t| Arg::Tensor(t.clone()))
    }
}

/// Positional and named arguments of one operator call.
#[derive(Debug, Clone, Default)]
pub struct OpArgs {
    positional: Vec<Arg>,
    named: BTreeMap<String, Arg>,
}

impl OpArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn with(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    /// Sets a named argument.
    pub fn with_named(mut self, name: &str, arg: impl Into<Arg>) -> Self {
        self.named.insert(name.to_string(), arg.into());
        self
    }

    pub fn positional(&self) -> &[Arg] {
        &self.positional
    }

    pub fn named(&self) -> &BTreeMap<String, Arg> {
        &self.named
    }

    /// Looks an argument up by name, falling back to its position.
    pub fn get(&self, name: &str, position: usize) -> Option<&Arg> {
        self.named
            .get(name)
            .or_else(|| self.positional.get(position))
    }

    /// Required tensor argument.
    pub fn tensor(&self, op: &str, name: &str, position: usize) -> Result<&Tensor, TensorError> {
        self.get(name, position)
            .and_then(Arg::as_tensor)
            .ok_or_else(|| TensorError::invalid_argument(op, format!("'{name}' must be a tensor")))
    }

    /// Every tensor passed to the call, positional first.
    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.positional
            .iter()
            .chain(self.named.values())
            .filter_map(Arg::as_tensor)
    }

    /// Renders the call as `path(arg, name=arg)`.
    pub fn describe(&self, path: &str) -> String {
        let parts: Vec<String> = self
            .positional
            .iter()
            .map(Arg::describe)
            .chain(self.named.iter().map(|(k, v)| format!("{k}={}", v.describe())))
            .collect();
        format!("{path}({})", parts.join(", "))
    }
}

/// Result of an operator call.
#[derive(Debug, Clone)]
pub enum OpOutput {
    Tensor(Tensor),
    Tuple(Vec<Tensor>),
}

impl OpOutput {
    /// Unwraps a single-tensor result.
    pub fn into_tensor(self) -> Result<Tensor, TensorError> {
        match self {
            OpOutput::Tensor(t) => Ok(t),
            OpOutput::Tuple(ts) => Err(TensorError::invalid_argument(
                "into_tensor",
                format!("expected one tensor, operator returned {}", ts.len()),
            )),
        }
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            OpOutput::Tensor(t) => vec![t],
            OpOutput::Tuple(ts) => ts.iter().collect(),
        }
    }
}

/// An operator implementation.
pub trait Kernel {
    fn call(&self, args: &OpArgs) -> Result<OpOutput, TensorError>;
}

impl<F> Kernel for F
where
    F: Fn(&OpArgs) -> Result<OpOutput, TensorError>,
{
    fn call(&self, args: &OpArgs) -> Result<OpOutput, TensorError> {
        self(args)
    }
}

/// Shared handle to a kernel as stored in the table.
pub type KernelRef = Rc<dyn Kernel>;

/// Where an operator lives: a namespace plus an attribute path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpLocation {
    namespace: String,
    attr: String,
}

impl OpLocation {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Full dotted path.
    pub fn path(&self) -> String {
        format!("{}.{}", self.namespace, self.attr)
    }
}

impl fmt::Display for OpLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.attr)
    }
}

/// Identity of every table entry at one point in time.
///
/// Two snapshots compare equal exactly when every path maps to the same
/// kernel object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot(Vec<(String, usize)>);

#[derive(Default)]
struct OpTable {
    namespaces: BTreeMap<String, BTreeMap<String, KernelRef>>,
}

impl OpTable {
    fn with_builtin_ops() -> Self {
        let mut table = Self::default();
        for (namespace, attr, kernel) in crate::ops::builtin_kernels() {
            table
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .insert(attr.to_string(), kernel);
        }
        table
    }

    fn resolve(&self, path: &str) -> Option<OpLocation> {
        // Try the longest namespace prefix first: "ops.nn.gelu" lands in
        // "ops.nn", "ops.Tensor.add" falls back to "ops" with attr "Tensor.add".
        let mut split = path.len();
        while let Some(dot) = path[..split].rfind('.') {
            let (namespace, attr) = (&path[..dot], &path[dot + 1..]);
            if self.namespaces.contains_key(namespace) {
                return Some(OpLocation {
                    namespace: namespace.to_string(),
                    attr: attr.to_string(),
                });
            }
            split = dot;
        }
        None
    }

    fn get(&self, location: &OpLocation) -> Option<KernelRef> {
        self.namespaces
            .get(&location.namespace)
            .and_then(|ns| ns.get(&location.attr))
            .cloned()
    }
}

thread_local! {
    static OP_TABLE: RefCell<OpTable> = RefCell::new(OpTable::with_builtin_ops());
}

/// Resolves a dotted path to the namespace that owns it.
///
/// Returns `None` when no prefix of the path names a namespace. The
/// attribute itself is not required to exist; see [`lookup`].
pub fn resolve(path: &str) -> Option<OpLocation> {
    OP_TABLE.with(|t| t.borrow().resolve(path))
}

/// Returns the kernel currently installed at `location`.
pub fn lookup(location: &OpLocation) -> Option<KernelRef> {
    OP_TABLE.with(|t| t.borrow().get(location))
}

/// Installs `kernel` at an existing `location`, returning the kernel it displaced.
pub fn replace(location: &OpLocation, kernel: KernelRef) -> Result<KernelRef, TensorError> {
    OP_TABLE.with(|t| {
        let mut table = t.borrow_mut();
        let slot = table
            .namespaces
            .get_mut(&location.namespace)
            .and_then(|ns| ns.get_mut(&location.attr))
            .ok_or_else(|| TensorError::UnknownOperator(location.path()))?;
        Ok(std::mem::replace(slot, kernel))
    })
}

/// Adds an operator, creating its namespace if needed.
pub fn register_op(namespace: &str, attr: &str, kernel: KernelRef) {
    OP_TABLE.with(|t| {
        t.borrow_mut()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(attr.to_string(), kernel);
    });
}

/// Removes an operator from the table.
pub fn remove_op(namespace: &str, attr: &str) -> Option<KernelRef> {
    OP_TABLE.with(|t| {
        t.borrow_mut()
            .namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.remove(attr))
    })
}

/// Captures the identity of every installed kernel.
pub fn snapshot() -> TableSnapshot {
    OP_TABLE.with(|t| {
        let table = t.borrow();
        let mut entries = Vec::new();
        for (namespace, ops) in &table.namespaces {
            for (attr, kernel) in ops {
                let addr = Rc::as_ptr(kernel) as *const () as usize;
                entries.push((format!("{namespace}.{attr}"), addr));
            }
        }
        TableSnapshot(entries)
    })
}

/// Dotted paths of every installed operator, sorted.
pub fn operator_paths() -> Vec<String> {
    OP_TABLE.with(|t| {
        t.borrow()
            .namespaces
            .iter()
            .flat_map(|(namespace, ops)| ops.keys().map(move |attr| format!("{namespace}.{attr}")))
            .collect()
    })
}

/// Calls the operator installed at `path`.
pub fn call(path: &str, args: OpArgs) -> Result<OpOutput, TensorError> {
    // The kernel is cloned out first: kernels call back into the table.
    let kernel = OP_TABLE.with(|t| {
        let table = t.borrow();
        table.resolve(path).and_then(|loc| table.get(&loc))
    });
    match kernel {
        Some(kernel) => kernel.call(&args),
        None => Err(TensorError::UnknownOperator(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn test_resolve_shortens_path() {
        let loc = resolve("ops.nn.gelu").unwrap();
        assert_eq!(loc.namespace(), "ops.nn");
        assert_eq!(loc.attr(), "gelu");

        let loc = resolve("ops.Tensor.add").unwrap();
        assert_eq!(loc.namespace(), "ops");
        assert_eq!(loc.attr(), "Tensor.add");
        assert_eq!(loc.path(), "ops.Tensor.add");

        assert!(resolve("nowhere.op").is_none());
        assert!(resolve("ops").is_none());
    }

    #[test]
    fn test_replace_and_restore() {
        let before = snapshot();
        let loc = resolve("ops.relu").unwrap();
        let stub: KernelRef = Rc::new(|args: &OpArgs| {
            Ok(OpOutput::Tensor(args.tensor("stub", "input", 0)?.clone()))
        });
        let original = replace(&loc, stub).unwrap();
        assert_ne!(snapshot(), before);

        let x = Tensor::from_f32(Shape::vector(2), &[-1.0, 1.0]).unwrap();
        let out = call("ops.relu", OpArgs::new().with(&x)).unwrap().into_tensor().unwrap();
        assert_eq!(out.to_f32_vec(), vec![-1.0, 1.0]);

        replace(&loc, original).unwrap();
        assert_eq!(snapshot(), before);
        let out = call("ops.relu", OpArgs::new().with(&x)).unwrap().into_tensor().unwrap();
        assert_eq!(out.to_f32_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_unknown_operator() {
        let err = call("ops.does_not_exist", OpArgs::new()).unwrap_err();
        assert!(matches!(err, TensorError::UnknownOperator(_)));

        let loc = resolve("ops.does_not_exist").unwrap();
        assert!(lookup(&loc).is_none());
        let stub: KernelRef = Rc::new(|_: &OpArgs| Ok(OpOutput::Tuple(Vec::new())));
        assert!(replace(&loc, stub).is_err());
    }

    #[test]
    fn test_register_custom_namespace() {
        let kernel: KernelRef = Rc::new(|_: &OpArgs| {
            Ok(OpOutput::Tensor(Tensor::full(Shape::vector(1), crate::DType::F32, 3.0)))
        });
        register_op("custom.math", "three", kernel);
        let out = call("custom.math.three", OpArgs::new()).unwrap().into_tensor().unwrap();
        assert_eq!(out.to_f32_vec(), vec![3.0]);
        assert!(operator_paths().iter().any(|p| p == "custom.math.three"));
        assert!(remove_op("custom.math", "three").is_some());
        assert!(call("custom.math.three", OpArgs::new()).is_err());
    }

    #[test]
    fn test_arg_lookup_prefers_named() {
        let x = Tensor::zeros(Shape::vector(1), crate::DType::F32);
        let args = OpArgs::new().with(&x).with(1i64).with_named("dim", 2i64);
        assert_eq!(args.get("dim", 1).and_then(Arg::as_i64), Some(2));
        assert_eq!(args.get("other", 1).and_then(Arg::as_i64), Some(1));
        assert!(args.get("missing", 5).is_none());
        assert_eq!(args.tensors().count(), 1);
        assert!(args.describe("ops.f").starts_with("ops.f(tensor(shape=[1], dtype=f32), 1, dim=2"));
    }
}
