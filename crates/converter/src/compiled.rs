// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled module wrapper.
//!
//! A [`CompiledModule`] is a [`Module`] backed by a built engine. Its
//! persisted state is the serialized engine plus the ordered input and
//! output names, stored under three reserved state-dict keys.

use crate::dtype_map;
use crate::ConvertError;
use network_ir::{Engine, ExecutionContext, LayerProfiler, NetworkDefinition};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tensor_core::{
    current_stream, DataPtr, Module, ModuleOutput, StateDict, StateValue, Tensor, TensorError,
};

const ENGINE_KEY: &str = "engine";
const INPUT_NAMES_KEY: &str = "input_names";
const OUTPUT_NAMES_KEY: &str = "output_names";

pub struct CompiledModule {
    engine: Arc<Engine>,
    context: ExecutionContext,
    engine_bytes: Vec<u8>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    network: Option<NetworkDefinition>,
}

impl CompiledModule {
    pub fn new(
        engine: Engine,
        input_names: Vec<String>,
        output_names: Vec<String>,
    ) -> Result<Self, ConvertError> {
        let engine_bytes = engine.serialize()?;
        let module = Self::from_parts(Arc::new(engine), engine_bytes, input_names, output_names)?;
        Ok(module)
    }

    fn from_parts(
        engine: Arc<Engine>,
        engine_bytes: Vec<u8>,
        input_names: Vec<String>,
        output_names: Vec<String>,
    ) -> Result<Self, ConvertError> {
        for name in input_names.iter().chain(&output_names) {
            if engine.binding_index(name).is_none() {
                return Err(ConvertError::invalid_argument(
                    "compiled module",
                    format!("engine has no binding named '{name}'"),
                ));
            }
        }
        Ok(Self {
            context: ExecutionContext::new(Arc::clone(&engine)),
            engine,
            engine_bytes,
            input_names,
            output_names,
            network: None,
        })
    }

    /// Rebuilds a module from state written by [`Module::state_dict`].
    pub fn from_state_dict(state: &StateDict, prefix: &str) -> Result<Self, ConvertError> {
        let missing = |key: &str| TensorError::Persistence(format!("missing state entry '{prefix}{key}'"));
        let bytes = state
            .bytes(&format!("{prefix}{ENGINE_KEY}"))
            .ok_or_else(|| missing(ENGINE_KEY))?
            .to_vec();
        let inputs = state
            .strings(&format!("{prefix}{INPUT_NAMES_KEY}"))
            .ok_or_else(|| missing(INPUT_NAMES_KEY))?
            .to_vec();
        let outputs = state
            .strings(&format!("{prefix}{OUTPUT_NAMES_KEY}"))
            .ok_or_else(|| missing(OUTPUT_NAMES_KEY))?
            .to_vec();
        let engine = Engine::deserialize(&bytes)?;
        Self::from_parts(Arc::new(engine), bytes, inputs, outputs)
    }

    /// Writes the module state to a SafeTensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConvertError> {
        let mut state = StateDict::new();
        self.state_dict(&mut state, "");
        state.save(path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        Self::from_state_dict(&StateDict::load(path)?, "")
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Serialized engine, as persisted.
    pub fn engine_bytes(&self) -> &[u8] {
        &self.engine_bytes
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn num_input_bindings(&self) -> usize {
        self.engine.num_inputs()
    }

    pub fn num_output_bindings(&self) -> usize {
        self.engine.num_outputs()
    }

    /// The traced network, when it was kept.
    pub fn network(&self) -> Option<&NetworkDefinition> {
        self.network.as_ref()
    }

    pub(crate) fn set_network(&mut self, network: NetworkDefinition) {
        self.network = Some(network);
    }

    /// Records per-layer timings on every following run.
    pub fn enable_profiling(&mut self) -> Arc<Mutex<LayerProfiler>> {
        let profiler = Arc::new(Mutex::new(LayerProfiler::new()));
        self.context.set_profiler(Some(Arc::clone(&profiler)));
        profiler
    }

    pub fn disable_profiling(&mut self) {
        self.context.set_profiler(None);
    }

    pub fn profiler(&self) -> Option<&Arc<Mutex<LayerProfiler>>> {
        self.context.profiler()
    }

    /// Queues the engine on the current stream.
    ///
    /// The batch size is taken from the first input. Output tensors are
    /// allocated here and filled once the stream is synchronized.
    pub fn execute(&self, inputs: &[Tensor]) -> Result<ModuleOutput, ConvertError> {
        if inputs.len() != self.input_names.len() {
            return Err(ConvertError::invalid_argument(
                "compiled module",
                format!("expected {} inputs, got {}", self.input_names.len(), inputs.len()),
            ));
        }
        let batch_size = inputs
            .first()
            .and_then(|t| t.shape().dim(0))
            .ok_or_else(|| ConvertError::invalid_argument("compiled module", "inputs need a batch dimension"))?;

        let mut bindings = vec![DataPtr::new(Vec::new()); self.engine.num_bindings()];
        let mut outputs = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let index = self.binding_index(name)?;
            let shape = self
                .engine
                .binding_shape(index)
                .ok_or_else(|| ConvertError::MissingHandle(name.clone()))?
                .with_batch(batch_size);
            let dtype = self.binding_dtype(index)?;
            let location = self
                .engine
                .binding_location(index)
                .ok_or_else(|| ConvertError::MissingHandle(name.clone()))?;
            let output = Tensor::empty(shape, dtype_map::host_dtype(dtype), dtype_map::device(location));
            bindings[index] = output.data_ptr();
            outputs.push(output);
        }
        for (name, input) in self.input_names.iter().zip(inputs) {
            let index = self.binding_index(name)?;
            let storage = self.binding_dtype(index)?.storage();
            bindings[index] = if input.dtype() == storage {
                input.contiguous()?.data_ptr()
            } else {
                DataPtr::new(storage.encode(&input.to_f32_vec()))
            };
        }

        self.context.execute_async(batch_size, &bindings, &current_stream())?;
        Ok(match outputs.len() {
            1 => ModuleOutput::Single(outputs.remove(0)),
            _ => ModuleOutput::Tuple(outputs),
        })
    }

    fn binding_index(&self, name: &str) -> Result<usize, ConvertError> {
        self.engine
            .binding_index(name)
            .ok_or_else(|| ConvertError::MissingHandle(name.to_string()))
    }

    fn binding_dtype(&self, index: usize) -> Result<network_ir::DataType, ConvertError> {
        self.engine
            .binding_dtype(index)
            .ok_or_else(|| ConvertError::invalid_argument("compiled module", format!("no binding {index}")))
    }
}

impl Module for CompiledModule {
    fn forward(&self, inputs: &[Tensor]) -> Result<ModuleOutput, TensorError> {
        self.execute(inputs).map_err(|e| match e {
            ConvertError::Tensor(inner) => inner,
            other => TensorError::External(Box::new(other)),
        })
    }

    fn state_dict(&self, dest: &mut StateDict, prefix: &str) {
        dest.insert(format!("{prefix}{ENGINE_KEY}"), StateValue::Bytes(self.engine_bytes.clone()));
        dest.insert(
            format!("{prefix}{INPUT_NAMES_KEY}"),
            StateValue::Strings(self.input_names.clone()),
        );
        dest.insert(
            format!("{prefix}{OUTPUT_NAMES_KEY}"),
            StateValue::Strings(self.output_names.clone()),
        );
    }

    fn load_state_dict(&mut self, state: &StateDict, prefix: &str) -> Result<(), TensorError> {
        let restored = Self::from_state_dict(state, prefix).map_err(|e| match e {
            ConvertError::Tensor(inner) => inner,
            other => TensorError::Persistence(other.to_string()),
        })?;
        let network = self.network.take();
        *self = restored;
        self.network = network;
        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("engine", &self.engine.name())
            .field("inputs", &self.input_names)
            .field("outputs", &self.output_names)
            .field("engine_bytes", &self.engine_bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use network_ir::{ActivationType, Builder, BuilderConfig, DataType, TensorLocation};
    use tensor_core::{DType, Device, Shape};

    fn relu_module() -> CompiledModule {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, Shape::vector(3)).unwrap();
        let y = net.add_activation(x, ActivationType::Relu).unwrap().output;
        net.set_tensor_name(y, "y").unwrap();
        net.set_tensor_location(y, TensorLocation::Host).unwrap();
        net.mark_output(y).unwrap();
        let mut config = BuilderConfig::default();
        config.max_batch_size = 2;
        let engine = Builder::default().build_engine(&net, &mut config).unwrap();
        CompiledModule::new(engine, vec!["x".into()], vec!["y".into()]).unwrap()
    }

    #[test]
    fn test_execute_is_deferred_until_sync() {
        let module = relu_module();
        let x = Tensor::from_f32(Shape::matrix(2, 3), &[-1.0, 2.0, -3.0, 4.0, -5.0, 6.0]).unwrap();
        let out = module.forward(&[x]).unwrap();
        let y = out.single().unwrap();
        assert_eq!(y.shape(), &Shape::matrix(2, 3));
        assert_eq!(y.device(), Device::Cpu);
        current_stream().synchronize().unwrap();
        assert_eq!(y.to_f32_vec(), vec![0.0, 2.0, 0.0, 4.0, 0.0, 6.0]);
    }

    #[test]
    fn test_state_dict_keys_use_prefix() {
        let module = relu_module();
        let mut state = StateDict::new();
        module.state_dict(&mut state, "trt.");
        let keys: Vec<_> = state.keys().collect();
        assert_eq!(keys, vec!["trt.engine", "trt.input_names", "trt.output_names"]);
        let restored = CompiledModule::from_state_dict(&state, "trt.").unwrap();
        assert_eq!(restored.engine_bytes(), module.engine_bytes());
        assert!(CompiledModule::from_state_dict(&state, "").is_err());
    }

    #[test]
    fn test_wrong_input_count() {
        let module = relu_module();
        assert!(matches!(module.execute(&[]), Err(ConvertError::InvalidArgument { .. })));
    }

    #[test]
    fn test_batch_above_maximum_is_rejected() {
        let module = relu_module();
        let x = Tensor::zeros(Shape::matrix(3, 3), DType::F32);
        assert!(matches!(module.execute(&[x]), Err(ConvertError::Engine(_))));
    }
}
