// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The conversion entry point.

use crate::calibration::{DatasetCalibrator, TensorBatchDataset};
use crate::compiled::CompiledModule;
use crate::config::ConversionConfig;
use crate::context::{ConversionContext, TraceScope};
use crate::registry::ConverterRegistry;
use crate::ConvertError;
use network_ir::{export, Builder, BuilderConfig, BuilderFlag, NetworkDefinition, NetworkParser};
use std::time::Instant;
use tensor_core::{Module, Tensor};

/// Converts `module` using the built-in rules.
///
/// INT8 builds calibrate on the full `inputs`; use [`convert_with`] to
/// pass a separate dataset.
pub fn convert(
    module: &dyn Module,
    inputs: &[Tensor],
    config: &ConversionConfig,
) -> Result<CompiledModule, ConvertError> {
    convert_with(module, inputs, config, &ConverterRegistry::builtin(), None)
}

/// Converts `module` with an explicit rule registry and calibration dataset.
///
/// The module runs twice on the first batch row of `inputs`: once to
/// count its outputs and once under trace. Any failure aborts the whole
/// conversion, and the operator table is restored either way.
pub fn convert_with(
    module: &dyn Module,
    inputs: &[Tensor],
    config: &ConversionConfig,
    registry: &ConverterRegistry,
    dataset: Option<TensorBatchDataset>,
) -> Result<CompiledModule, ConvertError> {
    config.validate()?;
    if inputs.is_empty() {
        return Err(ConvertError::invalid_argument("convert", "at least one example input is required"));
    }
    let started = Instant::now();

    let example: Vec<Tensor> = inputs
        .iter()
        .map(|t| t.narrow_batch(0, 1))
        .collect::<Result<_, _>>()?;
    let probe = module.forward(&example).map_err(ConvertError::from_host)?;
    let input_names = config.resolve_input_names(example.len())?;
    let output_names = config.resolve_output_names(probe.len())?;

    tracing::info!(
        inputs = input_names.len(),
        outputs = output_names.len(),
        rules = registry.len(),
        "tracing module"
    );
    let network = trace(module, &example, &input_names, &output_names, registry)?;
    tracing::info!(layers = network.num_layers(), "trace complete");

    let network = if config.use_exchange_format {
        reparse(&network)?
    } else {
        network
    };

    let mut builder_config = builder_config(config, dataset, inputs, &input_names)?;
    let builder = Builder::new(config.severity()?);
    let engine = builder.build_engine(&network, &mut builder_config)?;
    tracing::info!(
        layers = engine.num_layers(),
        max_batch_size = engine.max_batch_size(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "engine built"
    );

    let mut compiled = CompiledModule::new(engine, input_names, output_names)?;
    tracing::info!(bytes = compiled.engine_bytes().len(), "serialized engine");
    if config.keep_network {
        compiled.set_network(network);
    }
    Ok(compiled)
}

/// Runs `module` under trace and returns the recorded network.
fn trace(
    module: &dyn Module,
    example: &[Tensor],
    input_names: &[String],
    output_names: &[String],
    registry: &ConverterRegistry,
) -> Result<NetworkDefinition, ConvertError> {
    let scope = TraceScope::begin(registry, ConversionContext::new())?;
    scope.with_context(|ctx| ctx.add_inputs(example, input_names))??;
    let outputs = module.forward(example).map_err(ConvertError::from_host)?;
    scope.with_context(|ctx| ctx.mark_outputs(&outputs.into_tensors(), output_names))??;
    Ok(scope.finish().into_network())
}

/// Sends the network through the graph exchange format.
fn reparse(network: &NetworkDefinition) -> Result<NetworkDefinition, ConvertError> {
    let document = export(network)?;
    let mut parsed = NetworkDefinition::new();
    NetworkParser::new(&mut parsed).parse(&document)?;
    tracing::debug!(bytes = document.len(), "network re-parsed from exchange format");
    Ok(parsed)
}

fn builder_config(
    config: &ConversionConfig,
    dataset: Option<TensorBatchDataset>,
    inputs: &[Tensor],
    input_names: &[String],
) -> Result<BuilderConfig, ConvertError> {
    let mut builder_config = BuilderConfig::default();
    builder_config.max_workspace_size = config.workspace_size()?.as_bytes();
    builder_config.max_batch_size = config.max_batch_size;
    if config.fp16_mode {
        builder_config.set_flag(BuilderFlag::Fp16);
    }
    if config.strict_type_constraints {
        builder_config.set_flag(BuilderFlag::StrictTypes);
    }
    if config.int8_mode {
        builder_config.set_flag(BuilderFlag::Int8);
        // Quantization-aware networks carry their own ranges.
        if !config.qat_mode {
            let dataset = match dataset {
                Some(dataset) => dataset,
                None => TensorBatchDataset::new(inputs.to_vec())?,
            };
            let calibrator = DatasetCalibrator::new(
                dataset,
                input_names.to_vec(),
                config.int8_calib_batch_size,
                config.int8_calib_algorithm,
            )?;
            builder_config.set_calibrator(Box::new(calibrator));
        }
    }
    Ok(builder_config)
}
