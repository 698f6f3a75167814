// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for dispatched tensor operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tensor_core::{ops, Shape, Tensor};

fn bench_matmul(c: &mut Criterion) {
    let a = Tensor::from_f32(Shape::matrix(64, 64), &vec![0.5; 64 * 64]).unwrap();
    let b = Tensor::from_f32(Shape::matrix(64, 64), &vec![0.25; 64 * 64]).unwrap();
    c.bench_function("matmul_64x64", |bench| {
        bench.iter(|| ops::matmul(black_box(&a), black_box(&b)).unwrap())
    });
}

fn bench_softmax(c: &mut Criterion) {
    let x = Tensor::from_f32(Shape::matrix(32, 128), &vec![1.0; 32 * 128]).unwrap();
    c.bench_function("softmax_32x128", |bench| {
        bench.iter(|| ops::nn::softmax(black_box(&x), -1).unwrap())
    });
}

fn bench_broadcast_add(c: &mut Criterion) {
    let x = Tensor::from_f32(Shape::matrix(128, 128), &vec![1.0; 128 * 128]).unwrap();
    let row = Tensor::from_f32(Shape::vector(128), &vec![2.0; 128]).unwrap();
    c.bench_function("add_broadcast_row", |bench| {
        bench.iter(|| ops::add(black_box(&x), black_box(&row)).unwrap())
    });
}

criterion_group!(benches, bench_matmul, bench_softmax, bench_broadcast_add);
criterion_main!(benches);
