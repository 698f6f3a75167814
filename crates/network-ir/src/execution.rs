// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Engine execution.
//!
//! The batch dimension is implicit: every layer runs once per batch item
//! on per-item shapes, reading item `b` of each input binding and writing
//! item `b` of each output binding. Constants are shared by all items.

use crate::network::{Layer, LayerKind, TensorRef};
use crate::types::{axes_from_mask, ReduceOp};
use crate::{Engine, EngineError, LayerProfiler};
use half::f16;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tensor_core::ops::kernels::{batched_matmul, broadcast_binary, normalize_rows, permute, reduce_mean, softmax_axis};
use tensor_core::{DataPtr, Stream, TaskError};

/// Callback receiving every layer output (per batch item) during a run.
pub(crate) type Observer<'a> = &'a mut dyn FnMut(TensorRef, &[f32]);

impl Engine {
    /// Checks that `bindings` match the binding table for `batch_size`.
    pub(crate) fn check_bindings(
        &self,
        batch_size: usize,
        bindings: &[DataPtr],
    ) -> Result<(), EngineError> {
        if batch_size == 0 || batch_size > self.max_batch_size {
            return Err(EngineError::Binding(format!(
                "batch size {batch_size} outside 1..={}",
                self.max_batch_size
            )));
        }
        if bindings.len() != self.bindings.len() {
            return Err(EngineError::Binding(format!(
                "expected {} bindings, got {}",
                self.bindings.len(),
                bindings.len()
            )));
        }
        for (binding, ptr) in self.bindings.iter().zip(bindings) {
            let expected = binding.size_bytes(batch_size);
            if ptr.len() != expected {
                return Err(EngineError::Binding(format!(
                    "binding '{}' needs {expected} bytes for batch {batch_size}, buffer has {}",
                    binding.name,
                    ptr.len()
                )));
            }
        }
        Ok(())
    }

    /// Runs all layers for `batch_size` items.
    pub(crate) fn run(
        &self,
        batch_size: usize,
        bindings: &[DataPtr],
        profiler: Option<&Mutex<LayerProfiler>>,
        mut observer: Option<Observer<'_>>,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut layer_times = vec![Duration::ZERO; self.layers.len()];
        let input_bytes: Vec<Option<Vec<u8>>> = self
            .bindings
            .iter()
            .zip(bindings)
            .map(|(b, ptr)| b.is_input.then(|| ptr.read_bytes()))
            .collect();
        let mut output_bytes: Vec<Vec<u8>> = vec![Vec::new(); self.bindings.len()];

        for item in 0..batch_size {
            let mut values: Vec<Option<Vec<f32>>> = vec![None; self.tensors.len()];
            for (binding, bytes) in self.bindings.iter().zip(&input_bytes) {
                if let Some(bytes) = bytes {
                    let stride = binding.size_bytes(1);
                    let slice = &bytes[item * stride..(item + 1) * stride];
                    values[binding.tensor.index()] = Some(binding.dtype.storage().decode(slice));
                }
            }

            for (i, layer) in self.layers.iter().enumerate() {
                let t0 = Instant::now();
                let mut out = self.compute(layer, &values)?;
                self.apply_precision(layer.output, &mut out);
                layer_times[i] += t0.elapsed();
                if let Some(observe) = observer.as_mut() {
                    observe(layer.output, &out);
                }
                values[layer.output.index()] = Some(out);
            }

            for (slot, binding) in self.bindings.iter().enumerate().filter(|(_, b)| !b.is_input) {
                let data = values[binding.tensor.index()].as_ref().ok_or_else(|| EngineError::Execution {
                    layer: binding.name.clone(),
                    detail: "output was never computed".into(),
                })?;
                output_bytes[slot].extend_from_slice(&binding.dtype.storage().encode(data));
            }
        }

        for (slot, binding) in self.bindings.iter().enumerate().filter(|(_, b)| !b.is_input) {
            bindings[slot].write_bytes(&output_bytes[slot]).map_err(|e| EngineError::Binding(format!(
                "writing output '{}': {e}",
                binding.name
            )))?;
        }

        if let Some(profiler) = profiler {
            let mut p = profiler.lock().unwrap_or_else(|e| e.into_inner());
            for (layer, time) in self.layers.iter().zip(layer_times) {
                p.report_layer_time(&layer.name, time);
            }
            p.finish_run(started.elapsed());
        }
        Ok(())
    }

    /// Rounds or quantizes a layer output according to the build precision.
    fn apply_precision(&self, tensor: TensorRef, data: &mut [f32]) {
        if self.precision.int8 {
            if let Some(&range) = self.dynamic_ranges.get(&tensor.index()) {
                let scale = if range > 0.0 { range / 127.0 } else { 1.0 };
                for x in data.iter_mut() {
                    *x = (*x / scale).round().clamp(-127.0, 127.0) * scale;
                }
                return;
            }
        }
        if self.precision.fp16 {
            for x in data.iter_mut() {
                *x = f16::from_f32(*x).to_f32();
            }
        }
    }

    fn compute(&self, layer: &Layer, values: &[Option<Vec<f32>>]) -> Result<Vec<f32>, EngineError> {
        let fail = |detail: String| EngineError::Execution {
            layer: layer.name.clone(),
            detail,
        };
        let inputs: Vec<&[f32]> = layer
            .inputs
            .iter()
            .map(|t| {
                values[t.index()]
                    .as_deref()
                    .ok_or_else(|| fail(format!("input tensor #{} has no value", t.index())))
            })
            .collect::<Result<_, _>>()?;
        let shape_of = |t: TensorRef| &self.tensors[t.index()].shape;

        let out = match &layer.kind {
            LayerKind::Constant { weights, .. } => weights.values.clone(),
            LayerKind::Shuffle { first_transpose, .. } => match first_transpose {
                Some(perm) => permute(inputs[0], shape_of(layer.inputs[0]), perm).0,
                None => inputs[0].to_vec(),
            },
            LayerKind::ElementWise { op } => {
                let op = *op;
                broadcast_binary(
                    "elementwise",
                    inputs[0],
                    shape_of(layer.inputs[0]),
                    inputs[1],
                    shape_of(layer.inputs[1]),
                    move |a, b| op.apply(a, b),
                )
                .map_err(|e| fail(e.to_string()))?
                .0
            }
            LayerKind::Activation { activation } => inputs[0].iter().map(|&x| activation.apply(x)).collect(),
            LayerKind::Unary { op } => inputs[0].iter().map(|&x| op.apply(x)).collect(),
            LayerKind::MatrixMultiply => {
                batched_matmul(inputs[0], shape_of(layer.inputs[0]), inputs[1], shape_of(layer.inputs[1]))
                    .map_err(|e| fail(e.to_string()))?
                    .0
            }
            LayerKind::SoftMax { axes } => {
                softmax_axis(inputs[0], shape_of(layer.inputs[0]), axes.trailing_zeros() as usize)
            }
            LayerKind::Reduce { op, axes, keep_dims } => {
                let shape = shape_of(layer.inputs[0]);
                let dims = axes_from_mask(*axes);
                let (mut out, _) = reduce_mean(inputs[0], shape, &dims, *keep_dims);
                if *op == ReduceOp::Sum {
                    let count: usize = dims.iter().map(|&d| shape.dims()[d]).product();
                    out.iter_mut().for_each(|x| *x *= count as f32);
                }
                out
            }
            LayerKind::Normalization { axes, epsilon } => {
                let shape = shape_of(layer.inputs[0]);
                let row_len: usize = axes_from_mask(*axes).iter().map(|&d| shape.dims()[d]).product();
                let normalized = normalize_rows(inputs[0], row_len, *epsilon);
                let (scaled, _) = broadcast_binary(
                    "normalization",
                    &normalized,
                    shape,
                    inputs[1],
                    shape_of(layer.inputs[1]),
                    |a, b| a * b,
                )
                .map_err(|e| fail(e.to_string()))?;
                broadcast_binary("normalization", &scaled, shape, inputs[2], shape_of(layer.inputs[2]), |a, b| a + b)
                    .map_err(|e| fail(e.to_string()))?
                    .0
            }
            LayerKind::Identity => inputs[0].to_vec(),
        };
        Ok(out)
    }
}

/// A session for running one engine.
///
/// Bindings are given as buffer handles ordered like
/// [`Engine::bindings`]: inputs are read from them and outputs written
/// into them.
pub struct ExecutionContext {
    engine: Arc<Engine>,
    profiler: Option<Arc<Mutex<LayerProfiler>>>,
}

impl ExecutionContext {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            profiler: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Attaches (or detaches) a per-layer profiler.
    pub fn set_profiler(&mut self, profiler: Option<Arc<Mutex<LayerProfiler>>>) {
        self.profiler = profiler;
    }

    pub fn profiler(&self) -> Option<&Arc<Mutex<LayerProfiler>>> {
        self.profiler.as_ref()
    }

    /// Runs the engine synchronously.
    pub fn execute(&self, batch_size: usize, bindings: &[DataPtr]) -> Result<(), EngineError> {
        self.engine.check_bindings(batch_size, bindings)?;
        self.engine.run(batch_size, bindings, self.profiler.as_deref(), None)
    }

    /// Queues a run on `stream`.
    ///
    /// Bindings are validated immediately; the outputs are written when the
    /// stream is synchronized.
    pub fn execute_async(
        &self,
        batch_size: usize,
        bindings: &[DataPtr],
        stream: &Stream,
    ) -> Result<(), EngineError> {
        self.engine.check_bindings(batch_size, bindings)?;
        let engine = Arc::clone(&self.engine);
        let profiler = self.profiler.clone();
        let bindings = bindings.to_vec();
        stream.submit(move || {
            engine
                .run(batch_size, &bindings, profiler.as_deref(), None)
                .map_err(|e| Box::new(e) as TaskError)
        });
        tracing::trace!(stream = stream.handle(), batch_size, "engine run queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationType, Builder, BuilderConfig, BuilderFlag, DataType, ElementWiseOp, NetworkDefinition, Weights};
    use tensor_core::{DType, Shape, Tensor};

    /// relu(x + [1, 2, 3])
    fn engine() -> Arc<Engine> {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, Shape::vector(3)).unwrap();
        let c = net
            .add_constant(
                Shape::vector(3),
                Weights {
                    dtype: DataType::Float,
                    values: vec![1.0, 2.0, 3.0],
                },
            )
            .unwrap();
        let sum = net.add_elementwise(x, c.output, ElementWiseOp::Sum).unwrap();
        let y = net.add_activation(sum.output, ActivationType::Relu).unwrap();
        net.mark_output(y.output).unwrap();
        let mut config = BuilderConfig::default();
        config.max_batch_size = 4;
        Arc::new(Builder::default().build_engine(&net, &mut config).unwrap())
    }

    #[test]
    fn test_execute_batch() {
        let ctx = ExecutionContext::new(engine());
        let x = Tensor::from_f32(Shape::matrix(2, 3), &[-5.0, 0.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        let y = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        ctx.execute(2, &[x.data_ptr(), y.data_ptr()]).unwrap();
        assert_eq!(y.to_f32_vec(), vec![0.0, 2.0, 4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_execute_async_defers_until_synchronize() {
        let ctx = ExecutionContext::new(engine());
        let stream = Stream::new();
        let x = Tensor::from_f32(Shape::matrix(1, 3), &[1.0, 1.0, 1.0]).unwrap();
        let y = Tensor::zeros(Shape::matrix(1, 3), DType::F32);
        ctx.execute_async(1, &[x.data_ptr(), y.data_ptr()], &stream).unwrap();
        assert_eq!(y.to_f32_vec(), vec![0.0; 3]);
        stream.synchronize().unwrap();
        assert_eq!(y.to_f32_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_binding_validation() {
        let ctx = ExecutionContext::new(engine());
        let x = Tensor::zeros(Shape::matrix(1, 3), DType::F32);
        let y = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert!(matches!(ctx.execute(1, &[x.data_ptr(), y.data_ptr()]), Err(EngineError::Binding(_))));
        assert!(ctx.execute(1, &[x.data_ptr()]).is_err());
        assert!(ctx.execute(9, &[x.data_ptr(), y.data_ptr()]).is_err());
    }

    #[test]
    fn test_profiler_records_layers() {
        let mut ctx = ExecutionContext::new(engine());
        let profiler = Arc::new(Mutex::new(LayerProfiler::new()));
        ctx.set_profiler(Some(Arc::clone(&profiler)));
        let x = Tensor::zeros(Shape::matrix(1, 3), DType::F32);
        let y = Tensor::zeros(Shape::matrix(1, 3), DType::F32);
        ctx.execute(1, &[x.data_ptr(), y.data_ptr()]).unwrap();
        let p = profiler.lock().unwrap();
        assert_eq!(p.runs, 1);
        assert_eq!(p.layers.len(), ctx.engine().num_layers());
    }

    #[test]
    fn test_fp16_rounds_activations() {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, Shape::vector(1)).unwrap();
        let y = net.add_identity(x).unwrap();
        net.mark_output(y.output).unwrap();
        let mut config = BuilderConfig::default();
        config.set_flag(BuilderFlag::Fp16);
        let engine = Arc::new(Builder::default().build_engine(&net, &mut config).unwrap());

        let value = 1.0001f32;
        let xin = Tensor::from_f32(Shape::matrix(1, 1), &[value]).unwrap();
        let yout = Tensor::zeros(Shape::matrix(1, 1), DType::F32);
        ExecutionContext::new(engine)
            .execute(1, &[xin.data_ptr(), yout.data_ptr()])
            .unwrap();
        assert_eq!(yout.to_f32_vec()[0], f16::from_f32(value).to_f32());
    }
}
