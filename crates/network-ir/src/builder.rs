// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Engine builder.
//!
//! Building validates the network, drops layers that no output depends
//! on, checks the per-layer scratch requirement against the workspace
//! budget, and settles precision. For INT8 builds the dynamic range of
//! every tensor comes from the network itself, a calibration cache, or a
//! full-precision calibration pass driven by a [`Calibrator`].

use crate::calibrator::{decode_cache, encode_cache, Calibrator};
use crate::engine::{Binding, Engine, Precision};
use crate::execution::Observer;
use crate::network::{NetworkDefinition, TensorRef};
use crate::EngineError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tensor_core::DataPtr;

/// Reduced-precision and type-constraint switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuilderFlag {
    Fp16,
    Int8,
    StrictTypes,
}

/// Verbosity of builder diagnostics, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    InternalError,
    #[default]
    Error,
    Warning,
    Info,
    Verbose,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal_error" => Ok(Severity::InternalError),
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            "verbose" => Ok(Severity::Verbose),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::InternalError => "internal_error",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Verbose => "verbose",
        };
        f.write_str(s)
    }
}

/// Options for a single [`Builder::build_engine`] call.
pub struct BuilderConfig {
    /// Upper bound on per-layer scratch memory, in bytes.
    pub max_workspace_size: usize,
    pub max_batch_size: usize,
    flags: BTreeSet<BuilderFlag>,
    calibrator: Option<Box<dyn Calibrator>>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_workspace_size: 1 << 25,
            max_batch_size: 1,
            flags: BTreeSet::new(),
            calibrator: None,
        }
    }
}

impl fmt::Debug for BuilderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderConfig")
            .field("max_workspace_size", &self.max_workspace_size)
            .field("max_batch_size", &self.max_batch_size)
            .field("flags", &self.flags)
            .field("calibrator", &self.calibrator.is_some())
            .finish()
    }
}

impl BuilderConfig {
    pub fn set_flag(&mut self, flag: BuilderFlag) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: BuilderFlag) {
        self.flags.remove(&flag);
    }

    pub fn has_flag(&self, flag: BuilderFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn set_calibrator(&mut self, calibrator: Box<dyn Calibrator>) {
        self.calibrator = Some(calibrator);
    }

    pub fn calibrator(&self) -> Option<&dyn Calibrator> {
        self.calibrator.as_deref()
    }
}

/// Compiles [`NetworkDefinition`]s into [`Engine`]s.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    severity: Severity,
}

impl Builder {
    /// Creates a builder that reports diagnostics at or above `severity`.
    pub fn new(severity: Severity) -> Self {
        Self { severity }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    fn log(&self, severity: Severity, message: &str) {
        if severity > self.severity {
            return;
        }
        match severity {
            Severity::InternalError | Severity::Error => tracing::error!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Verbose => tracing::debug!("{message}"),
        }
    }

    /// Builds an engine for batch sizes up to `config.max_batch_size`.
    pub fn build_engine(
        &self,
        network: &NetworkDefinition,
        config: &mut BuilderConfig,
    ) -> Result<Engine, EngineError> {
        if network.outputs().is_empty() {
            self.log(Severity::Error, "network has no outputs");
            return Err(EngineError::Build("network has no outputs".into()));
        }
        if config.max_batch_size == 0 {
            return Err(EngineError::Build("max_batch_size must be at least 1".into()));
        }

        let live = live_layers(network);
        let pruned = network.num_layers() - live.len();
        if pruned > 0 {
            self.log(Severity::Info, &format!("removed {pruned} unused layers"));
        }

        let tensors = network.tensors().to_vec();
        let layers: Vec<_> = live.iter().map(|&i| network.layers()[i].clone()).collect();

        let per_item = |t: TensorRef| {
            let tensor = &tensors[t.index()];
            tensor.shape.size_bytes(tensor.dtype.storage())
        };
        let workspace = layers
            .iter()
            .map(|l| l.inputs.iter().map(|&t| per_item(t)).sum::<usize>() + per_item(l.output))
            .max()
            .unwrap_or(0)
            * config.max_batch_size;
        if workspace > config.max_workspace_size {
            let msg = format!(
                "layers need {workspace} bytes of workspace, limit is {}",
                config.max_workspace_size
            );
            self.log(Severity::Error, &msg);
            return Err(EngineError::Build(msg));
        }

        let binding = |t: TensorRef, is_input: bool| {
            let tensor = &tensors[t.index()];
            Binding {
                name: tensor.name.clone(),
                tensor: t,
                is_input,
                shape: tensor.shape.clone(),
                dtype: tensor.dtype,
                location: tensor.location,
            }
        };
        let bindings: Vec<Binding> = network
            .inputs()
            .iter()
            .map(|&t| binding(t, true))
            .chain(network.outputs().iter().map(|&t| binding(t, false)))
            .collect();

        let precision = Precision {
            fp16: config.has_flag(BuilderFlag::Fp16),
            int8: config.has_flag(BuilderFlag::Int8),
            strict_types: config.has_flag(BuilderFlag::StrictTypes),
        };

        let mut engine = Engine {
            name: network.name().to_string(),
            tensors,
            layers,
            bindings,
            max_batch_size: config.max_batch_size,
            precision: Precision::default(),
            dynamic_ranges: BTreeMap::new(),
        };

        if precision.int8 {
            engine.dynamic_ranges = self.dynamic_ranges(&engine, config)?;
        }
        engine.precision = precision;

        tracing::info!(
            name = %engine.name,
            layers = engine.num_layers(),
            bindings = engine.num_bindings(),
            max_batch_size = engine.max_batch_size,
            fp16 = precision.fp16,
            int8 = precision.int8,
            "engine built"
        );
        Ok(engine)
    }

    /// Collects INT8 ranges: explicit network ranges win over calibrated ones.
    fn dynamic_ranges(
        &self,
        engine: &Engine,
        config: &mut BuilderConfig,
    ) -> Result<BTreeMap<usize, f32>, EngineError> {
        let mut ranges: BTreeMap<usize, f32> = match config.calibrator.as_mut() {
            Some(calibrator) => {
                let by_name = match calibrator.read_calibration_cache() {
                    Some(cache) => {
                        self.log(Severity::Info, "using calibration cache");
                        decode_cache(&cache)?
                    }
                    None => {
                        let calibrated = self.calibrate(engine, calibrator.as_mut())?;
                        calibrator.write_calibration_cache(&encode_cache(&calibrated));
                        calibrated
                    }
                };
                engine
                    .tensors
                    .iter()
                    .enumerate()
                    .filter_map(|(i, t)| by_name.get(&t.name).map(|&r| (i, r)))
                    .collect()
            }
            None => BTreeMap::new(),
        };
        for (i, tensor) in engine.tensors.iter().enumerate() {
            if let Some(range) = tensor.dynamic_range {
                ranges.insert(i, range);
            }
        }

        let missing = engine
            .layers
            .iter()
            .filter(|l| !ranges.contains_key(&l.output.index()))
            .count();
        if missing > 0 {
            self.log(
                Severity::Warning,
                &format!("{missing} layer outputs have no dynamic range and stay in float"),
            );
        }
        Ok(ranges)
    }

    /// Runs calibration batches in full precision and derives a range for
    /// every input and layer output.
    fn calibrate(
        &self,
        engine: &Engine,
        calibrator: &mut dyn Calibrator,
    ) -> Result<BTreeMap<String, f32>, EngineError> {
        let batch_size = calibrator.batch_size();
        if batch_size == 0 {
            return Err(EngineError::Calibration("calibration batch size must be at least 1".into()));
        }
        let mut runner = engine.clone();
        runner.max_batch_size = batch_size;

        let input_names: Vec<String> = engine
            .bindings
            .iter()
            .filter(|b| b.is_input)
            .map(|b| b.name.clone())
            .collect();
        let mut observed: BTreeMap<usize, Vec<f32>> = BTreeMap::new();
        let mut batches = 0usize;

        while let Some(inputs) = calibrator.next_batch(&input_names)? {
            if inputs.len() != input_names.len() {
                return Err(EngineError::Calibration(format!(
                    "calibrator returned {} buffers for {} inputs",
                    inputs.len(),
                    input_names.len()
                )));
            }
            let mut inputs = inputs.into_iter();
            let mut bindings = Vec::with_capacity(engine.bindings.len());
            for b in &engine.bindings {
                if b.is_input {
                    let ptr = inputs.next().ok_or_else(|| EngineError::Calibration("missing input buffer".into()))?;
                    let values = b.dtype.storage().decode(&ptr.read_bytes());
                    observed
                        .entry(b.tensor.index())
                        .or_default()
                        .extend(values.iter().map(|v| v.abs()));
                    bindings.push(ptr);
                } else {
                    bindings.push(DataPtr::new(vec![0u8; b.size_bytes(batch_size)]));
                }
            }
            runner
                .check_bindings(batch_size, &bindings)
                .map_err(|e| EngineError::Calibration(e.to_string()))?;
            let mut observe = |t: TensorRef, values: &[f32]| {
                observed.entry(t.index()).or_default().extend(values.iter().map(|v| v.abs()));
            };
            runner.run(batch_size, &bindings, None, Some(&mut observe as Observer<'_>))?;
            batches += 1;
        }
        if batches == 0 {
            return Err(EngineError::Calibration("calibrator produced no batches".into()));
        }

        let algorithm = calibrator.algorithm();
        let ranges = observed
            .into_iter()
            .map(|(i, mut values)| (engine.tensors[i].name.clone(), algorithm.range(&mut values)))
            .collect();
        self.log(Severity::Info, &format!("calibrated {batches} batches with {algorithm:?}"));
        Ok(ranges)
    }
}

/// Indices of layers some network output depends on, in network order.
fn live_layers(network: &NetworkDefinition) -> Vec<usize> {
    let mut needed: BTreeSet<usize> = network.outputs().iter().map(|t| t.index()).collect();
    let mut live = Vec::new();
    for (i, layer) in network.layers().iter().enumerate().rev() {
        if needed.contains(&layer.output.index()) {
            needed.extend(layer.inputs.iter().map(|t| t.index()));
            live.push(i);
        }
    }
    live.reverse();
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationType, DataType, ExecutionContext, UnaryOp};
    use std::sync::Arc;
    use tensor_core::{DType, Shape, Tensor};

    fn relu_network() -> NetworkDefinition {
        let mut net = NetworkDefinition::new();
        let x = net.add_input("x", DataType::Float, Shape::vector(4)).unwrap();
        let y = net.add_activation(x, ActivationType::Relu).unwrap();
        net.mark_output(y.output).unwrap();
        net
    }

    struct OneBatch {
        data: Option<Tensor>,
        cache: Option<Vec<u8>>,
        written: Arc<std::sync::Mutex<Option<Vec<u8>>>>,
    }

    impl Calibrator for OneBatch {
        fn batch_size(&self) -> usize {
            1
        }

        fn next_batch(&mut self, names: &[String]) -> Result<Option<Vec<DataPtr>>, EngineError> {
            assert_eq!(names, ["x".to_string()]);
            Ok(self.data.take().map(|t| vec![t.data_ptr()]))
        }

        fn read_calibration_cache(&self) -> Option<Vec<u8>> {
            self.cache.clone()
        }

        fn write_calibration_cache(&mut self, cache: &[u8]) {
            *self.written.lock().unwrap() = Some(cache.to_vec());
        }
    }

    #[test]
    fn test_rejects_network_without_outputs() {
        let mut net = NetworkDefinition::new();
        net.add_input("x", DataType::Float, Shape::vector(2)).unwrap();
        let err = Builder::default()
            .build_engine(&net, &mut BuilderConfig::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn test_prunes_dead_layers() {
        let mut net = relu_network();
        let x = net.inputs()[0];
        net.add_unary(x, UnaryOp::Exp).unwrap();
        let engine = Builder::default()
            .build_engine(&net, &mut BuilderConfig::default())
            .unwrap();
        assert_eq!(engine.num_layers(), 1);
        assert_eq!(engine.layers()[0].kind.type_name(), "ACTIVATION");
    }

    #[test]
    fn test_workspace_limit() {
        let mut config = BuilderConfig {
            max_workspace_size: 16,
            ..Default::default()
        };
        let err = Builder::default()
            .build_engine(&relu_network(), &mut config)
            .unwrap_err();
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn test_severity_parse_and_order() {
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
        assert!(Severity::Error < Severity::Verbose);
    }

    #[test]
    fn test_int8_calibration_writes_cache() {
        let written = Arc::new(std::sync::Mutex::new(None));
        let mut config = BuilderConfig::default();
        config.set_flag(BuilderFlag::Int8);
        config.set_calibrator(Box::new(OneBatch {
            data: Some(Tensor::from_f32(Shape::matrix(1, 4), &[-2.0, 0.5, 1.0, 4.0]).unwrap()),
            cache: None,
            written: Arc::clone(&written),
        }));
        let engine = Builder::default().build_engine(&relu_network(), &mut config).unwrap();
        assert!(engine.precision().int8);
        assert_eq!(engine.dynamic_range("x"), Some(4.0));
        assert!(written.lock().unwrap().is_some());

        let x = Tensor::from_f32(Shape::matrix(1, 4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = Tensor::zeros(Shape::matrix(1, 4), DType::F32);
        ExecutionContext::new(Arc::new(engine))
            .execute(1, &[x.data_ptr(), y.data_ptr()])
            .unwrap();
        for (got, want) in y.to_f32_vec().iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 0.05);
        }
    }

    #[test]
    fn test_int8_uses_cache() {
        let mut cache = BTreeMap::new();
        cache.insert("x".to_string(), 8.0f32);
        let mut config = BuilderConfig::default();
        config.set_flag(BuilderFlag::Int8);
        config.set_calibrator(Box::new(OneBatch {
            data: None,
            cache: Some(encode_cache(&cache)),
            written: Arc::default(),
        }));
        let engine = Builder::default().build_engine(&relu_network(), &mut config).unwrap();
        assert_eq!(engine.dynamic_range("x"), Some(8.0));
    }
}
