// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: convert a two-layer MLP and compare it against eager execution.
//!
//! ```bash
//! RUST_LOG=converter=debug cargo run -p converter --example convert_mlp
//! ```

use converter::{convert, CompiledModule, ConversionConfig};
use tensor_core::{current_stream, ops, FnModule, Module, Shape, Tensor};

const BATCH: usize = 4;
const HIDDEN: usize = 16;

fn weights(rows: usize, cols: usize, seed: f32) -> anyhow::Result<Tensor> {
    let values: Vec<f32> = (0..rows * cols).map(|i| ((i as f32 * seed).sin()) * 0.5).collect();
    Ok(Tensor::from_f32(Shape::matrix(rows, cols), &values)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let w1 = weights(HIDDEN, 8, 0.37)?;
    let b1 = Tensor::full(Shape::vector(HIDDEN), tensor_core::DType::F32, 0.1);
    let w2 = weights(3, HIDDEN, 0.91)?;
    let mlp = FnModule::new(move |xs: &[Tensor]| {
        let h = ops::nn::gelu(&ops::nn::linear(&xs[0], &w1, Some(&b1))?)?;
        let h = ops::nn::layer_norm(&h, &[HIDDEN as i64], None, None, 1e-5)?;
        Ok(ops::nn::softmax(&ops::nn::linear(&h, &w2, None)?, -1)?.into())
    });

    let config = ConversionConfig {
        input_names: Some(vec!["features".into()]),
        output_names: Some(vec!["probabilities".into()]),
        max_batch_size: BATCH,
        ..ConversionConfig::default()
    };
    let x = weights(BATCH, 8, 1.3)?;
    let mut compiled = convert(&mlp, &[x.clone()], &config)?;

    if let Some(network) = compiled.network() {
        println!("Traced {} layers:", network.num_layers());
        for layer in network.layers() {
            println!("  {}", layer.name);
        }
    }

    let profiler = compiled.enable_profiling();
    let expected = mlp.forward(&[x.clone()])?.into_tensors();
    let actual = compiled.forward(&[x.clone()])?.into_tensors();
    current_stream().synchronize()?;

    let max_err = expected[0]
        .to_f32_vec()
        .iter()
        .zip(actual[0].to_f32_vec())
        .map(|(e, a)| (e - a).abs())
        .fold(0.0f32, f32::max);
    println!("\nmax |eager - compiled| = {max_err:.2e}");
    if let Ok(profiler) = profiler.lock() {
        println!("{}", profiler.summary());
    }

    let path = std::env::temp_dir().join("convert_mlp.safetensors");
    compiled.save(&path)?;
    let restored = CompiledModule::load(&path)?;
    println!(
        "Saved {} engine bytes to {} and restored {} -> {}",
        compiled.engine_bytes().len(),
        path.display(),
        restored.input_names().join(", "),
        restored.output_names().join(", "),
    );
    Ok(())
}
