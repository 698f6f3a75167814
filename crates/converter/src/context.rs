// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversion context and trace scope.
//!
//! [`ConversionContext`] is the state conversion rules work against: the
//! network under construction, the tensor → handle map, and the record of
//! the call being converted. [`TraceScope`] owns a context for the length
//! of one traced execution; creating it installs a hook on every operator
//! in the table and dropping it puts the previous kernels back, whether the
//! traced code returned normally or not.

use crate::dtype_map;
use crate::handles::HandleMap;
use crate::hook::{Interceptor, ReentrancyLock, Sentinel, TraceShared};
use crate::registry::ConverterRegistry;
use crate::ConvertError;
use network_ir::{NetworkDefinition, TensorRef};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tensor_core::dispatch::{self, Arg, KernelRef, OpArgs, OpLocation, OpOutput};
use tensor_core::{Tensor, TensorId};

/// One intercepted call, as seen by its conversion rule.
#[derive(Debug, Clone)]
pub struct OpRecord {
    path: String,
    args: OpArgs,
    output: OpOutput,
}

impl OpRecord {
    pub fn new(path: String, args: OpArgs, output: OpOutput) -> Self {
        Self { path, args, output }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &OpArgs {
        &self.args
    }

    /// Argument passed by `name`, else the one at `position`.
    pub fn arg(&self, name: &str, position: usize) -> Option<&Arg> {
        self.args.get(name, position)
    }

    /// Required tensor argument.
    pub fn tensor(&self, name: &str, position: usize) -> Result<&Tensor, ConvertError> {
        self.arg(name, position)
            .and_then(Arg::as_tensor)
            .ok_or_else(|| ConvertError::invalid_argument(&self.path, format!("'{name}' must be a tensor")))
    }

    /// Tensor argument that may be absent or `None`.
    pub fn optional_tensor(&self, name: &str, position: usize) -> Option<&Tensor> {
        self.arg(name, position).and_then(Arg::as_tensor)
    }

    pub fn float(&self, name: &str, position: usize) -> Option<f64> {
        self.arg(name, position).and_then(Arg::as_f64)
    }

    pub fn int(&self, name: &str, position: usize) -> Option<i64> {
        self.arg(name, position).and_then(Arg::as_i64)
    }

    pub fn ints(&self, name: &str, position: usize) -> Option<Vec<i64>> {
        self.arg(name, position).and_then(Arg::as_ints)
    }

    pub fn flag(&self, name: &str, position: usize) -> Option<bool> {
        self.arg(name, position).and_then(Arg::as_bool)
    }

    pub fn outputs(&self) -> Vec<&Tensor> {
        self.output.tensors()
    }

    /// The first (usually only) returned tensor.
    pub fn output(&self) -> Result<&Tensor, ConvertError> {
        self.output
            .tensors()
            .first()
            .copied()
            .ok_or_else(|| ConvertError::invalid_argument(&self.path, "call returned no tensors"))
    }

    /// `path(arg, ...)` with tensors as `tensor(shape=[..], dtype=..)`.
    pub fn describe(&self) -> String {
        self.args.describe(&self.path)
    }
}

/// State of one conversion.
#[derive(Debug, Default)]
pub struct ConversionContext {
    network: NetworkDefinition,
    handles: HandleMap,
    record: Option<OpRecord>,
    layer_counts: HashMap<&'static str, usize>,
    untraced: HashMap<TensorId, String>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl ConversionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> &NetworkDefinition {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut NetworkDefinition {
        &mut self.network
    }

    pub fn into_network(self) -> NetworkDefinition {
        self.network
    }

    pub fn handles(&self) -> &HandleMap {
        &self.handles
    }

    pub fn handle(&self, tensor: &Tensor) -> Option<TensorRef> {
        self.handles.get(tensor)
    }

    pub fn set_handle(&mut self, tensor: &Tensor, handle: TensorRef) {
        self.handles.set(tensor, handle);
    }

    /// Handle of `tensor`, which must already be in the network.
    pub fn required_handle(&self, tensor: &Tensor) -> Result<TensorRef, ConvertError> {
        if let Some(handle) = self.handles.get(tensor) {
            return Ok(handle);
        }
        match self.untraced.get(&tensor.id()) {
            Some(path) => Err(ConvertError::UnsupportedOperation(path.clone())),
            None => Err(ConvertError::MissingHandle(format!("{tensor:?}"))),
        }
    }

    /// Operator that produced `tensor` without a conversion rule, if any.
    pub fn untraced_source(&self, tensor: &Tensor) -> Option<&str> {
        self.untraced.get(&tensor.id()).map(String::as_str)
    }

    /// The call being converted. Fails outside a conversion rule.
    pub fn record(&self) -> Result<&OpRecord, ConvertError> {
        self.record.as_ref().ok_or(ConvertError::StaleContext)
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub(crate) fn begin_record(&mut self, record: OpRecord) {
        self.record = Some(record);
    }

    pub(crate) fn end_record(&mut self) -> Option<OpRecord> {
        self.record.take()
    }

    pub(crate) fn note_untraced(&mut self, tensor: &Tensor, path: &str) {
        if !self.handles.contains(tensor) {
            self.untraced.insert(tensor.id(), path.to_string());
        }
    }

    /// Names every layer from `first` on `"[TYPE #n] descriptor"`.
    pub(crate) fn name_layers_from(&mut self, first: usize, descriptor: &str) {
        let types: Vec<&'static str> = self.network.layers()[first..]
            .iter()
            .map(|layer| layer.kind.type_name())
            .collect();
        for (offset, type_name) in types.into_iter().enumerate() {
            let count = self.layer_counts.entry(type_name).or_insert(0);
            *count += 1;
            let name = format!("[{type_name} #{count}] {descriptor}");
            self.network.set_layer_name(first + offset, name);
        }
    }

    /// Adds each tensor without a handle as a network input.
    ///
    /// The leading (batch) dimension is dropped from the input shape; the
    /// built engine takes the batch size at execution time.
    pub fn add_inputs(&mut self, tensors: &[Tensor], names: &[String]) -> Result<(), ConvertError> {
        if tensors.len() != names.len() {
            return Err(ConvertError::invalid_argument(
                "add_inputs",
                format!("{} tensors but {} names", tensors.len(), names.len()),
            ));
        }
        for (tensor, name) in tensors.iter().zip(names) {
            if self.handles.contains(tensor) {
                continue;
            }
            if tensor.rank() == 0 {
                return Err(ConvertError::invalid_argument(
                    "add_inputs",
                    format!("input '{name}' has no batch dimension"),
                ));
            }
            let dtype = dtype_map::data_type(tensor.dtype())?;
            let location = dtype_map::location(tensor.device())?;
            let handle = self.network.add_input(name, dtype, tensor.shape().without_batch())?;
            self.network.set_tensor_location(handle, location)?;
            self.handles.set(tensor, handle);
            self.input_names.push(name.clone());
        }
        Ok(())
    }

    /// Names the network values of `tensors` and marks them as outputs.
    ///
    /// Every tensor must already have a handle. A value that is a network
    /// input, or is already an output, is first passed through an identity
    /// layer so each binding keeps its own name.
    pub fn mark_outputs(
        &mut self,
        tensors: &[Tensor],
        names: &[String],
    ) -> Result<(), ConvertError> {
        if tensors.len() != names.len() {
            return Err(ConvertError::invalid_argument(
                "mark_outputs",
                format!("{} tensors but {} names", tensors.len(), names.len()),
            ));
        }
        for (tensor, name) in tensors.iter().zip(names) {
            let mut handle = self.required_handle(tensor)?;
            let taken = self.network.inputs().contains(&handle) || self.network.outputs().contains(&handle);
            if taken {
                tracing::warn!(output = %name, "output aliases another binding; inserting identity");
                handle = self.network.add_identity(handle)?.output;
            }
            let dtype = dtype_map::data_type(tensor.dtype())?;
            let location = dtype_map::location(tensor.device())?;
            self.network.set_tensor_name(handle, name.clone())?;
            self.network.set_tensor_dtype(handle, dtype)?;
            self.network.set_tensor_location(handle, location)?;
            self.network.mark_output(handle)?;
            self.output_names.push(name.clone());
        }
        Ok(())
    }
}

thread_local! {
    static TRACE_ACTIVE: Cell<bool> = Cell::new(false);
}

/// An active trace: hooks are installed for as long as this value lives.
pub struct TraceScope {
    shared: Rc<TraceShared>,
    installed: Vec<(OpLocation, KernelRef)>,
}

impl TraceScope {
    /// Installs hooks for every operator in this thread's table.
    ///
    /// # Errors
    /// [`ConvertError::NestedTrace`] if a trace is already active on this thread.
    pub fn begin(
        registry: &ConverterRegistry,
        ctx: ConversionContext,
    ) -> Result<Self, ConvertError> {
        if TRACE_ACTIVE.with(|active| active.replace(true)) {
            return Err(ConvertError::NestedTrace);
        }
        let mut scope = Self {
            shared: Rc::new(TraceShared {
                lock: ReentrancyLock::new(),
                ctx: RefCell::new(ctx),
            }),
            installed: Vec::new(),
        };

        let mut intercepted = 0usize;
        for path in dispatch::operator_paths() {
            let Some(location) = dispatch::resolve(&path) else {
                continue;
            };
            let (hook, restore): (KernelRef, Option<KernelRef>) = match registry.get(&location.path()) {
                Some(registration) => {
                    intercepted += 1;
                    let hook: KernelRef = Rc::new(Interceptor::new(registration.clone(), Rc::clone(&scope.shared)));
                    (hook, Some(registration.original().clone()))
                }
                None => {
                    let Some(current) = dispatch::lookup(&location) else {
                        continue;
                    };
                    let hook: KernelRef = Rc::new(Sentinel::new(location.path(), current, Rc::clone(&scope.shared)));
                    (hook, None)
                }
            };
            let displaced = dispatch::replace(&location, hook)?;
            scope.installed.push((location, restore.unwrap_or(displaced)));
        }
        tracing::debug!(
            hooks = scope.installed.len(),
            intercepted,
            "trace hooks installed"
        );
        Ok(scope)
    }

    /// Runs `f` against the context between traced calls.
    pub fn with_context<R>(
        &self,
        f: impl FnOnce(&mut ConversionContext) -> R,
    ) -> Result<R, ConvertError> {
        let mut ctx = self
            .shared
            .ctx
            .try_borrow_mut()
            .map_err(|_| ConvertError::invalid_argument("trace", "context is in use by a conversion rule"))?;
        Ok(f(&mut *ctx))
    }

    pub fn is_locked(&self) -> bool {
        self.shared.lock.is_held()
    }

    /// Uninstalls the hooks and returns the finished context.
    pub fn finish(mut self) -> ConversionContext {
        self.uninstall();
        self.shared.ctx.take()
    }

    fn uninstall(&mut self) {
        let count = self.installed.len();
        for (location, kernel) in self.installed.drain(..).rev() {
            if let Err(e) = dispatch::replace(&location, kernel) {
                tracing::warn!(op = %location, error = %e, "could not restore operator");
            }
        }
        if count > 0 {
            tracing::debug!(hooks = count, "trace hooks removed");
        }
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        self.uninstall();
        TRACE_ACTIVE.with(|active| active.set(false));
    }
}
