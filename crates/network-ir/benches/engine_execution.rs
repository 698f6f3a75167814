// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for engine build and execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use network_ir::{
    ActivationType, Builder, BuilderConfig, DataType, ExecutionContext, NetworkDefinition, Weights,
};
use std::sync::Arc;
use tensor_core::{DType, Shape, Tensor};

/// relu(x @ W) with x: [1, 64], W: [64, 64].
fn mlp_network() -> NetworkDefinition {
    let mut net = NetworkDefinition::new();
    let x = net.add_input("x", DataType::Float, Shape::matrix(1, 64)).unwrap();
    let w = net
        .add_constant(
            Shape::matrix(64, 64),
            Weights {
                dtype: DataType::Float,
                values: (0..64 * 64).map(|i| (i % 7) as f32 * 0.01).collect(),
            },
        )
        .unwrap();
    let mm = net.add_matrix_multiply(x, w.output).unwrap();
    let y = net.add_activation(mm.output, ActivationType::Relu).unwrap();
    net.mark_output(y.output).unwrap();
    net
}

fn bench_build(c: &mut Criterion) {
    let net = mlp_network();
    c.bench_function("build_mlp", |b| {
        b.iter(|| {
            Builder::default()
                .build_engine(black_box(&net), &mut BuilderConfig::default())
                .unwrap()
        })
    });
}

fn bench_execute(c: &mut Criterion) {
    let mut config = BuilderConfig::default();
    config.max_batch_size = 8;
    let engine = Builder::default().build_engine(&mlp_network(), &mut config).unwrap();
    let ctx = ExecutionContext::new(Arc::new(engine));
    let x = Tensor::full(Shape::new(vec![8, 1, 64]), DType::F32, 0.5);
    let y = Tensor::zeros(Shape::new(vec![8, 1, 64]), DType::F32);
    let bindings = [x.data_ptr(), y.data_ptr()];

    c.bench_function("execute_mlp_batch8", |b| b.iter(|| ctx.execute(8, black_box(&bindings)).unwrap()));
}

criterion_group!(benches, bench_build, bench_execute);
criterion_main!(benches);
