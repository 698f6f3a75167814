// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slice-level numeric kernels.
//!
//! These work on flat row-major `f32` buffers plus a [`Shape`] and know
//! nothing about tensors or the operator table, so an engine interpreter
//! can share them with the eager operators.

use crate::{Shape, TensorError};

/// Coefficient `sqrt(2/π)`.
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// Cubic coefficient in the tanh approximation.
const GELU_COEFF: f32 = 0.044715;

/// Computes GELU for a single value with the tanh approximation:
///
/// `GELU(x) ≈ 0.5 * x * (1 + tanh(sqrt(2/π) * (x + 0.044715 * x³)))`
#[inline(always)]
pub fn gelu_scalar(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}

#[inline(always)]
pub fn sigmoid_scalar(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-major strides of `shape` left-padded to `rank`, with broadcast
/// (size-1) dimensions given stride 0.
fn broadcast_strides(shape: &Shape, rank: usize) -> Vec<usize> {
    let padded = shape.left_padded(rank);
    padded
        .dims()
        .iter()
        .zip(padded.strides())
        .map(|(&d, s)| if d == 1 { 0 } else { s })
        .collect()
}

/// Maps a flat index in `out_dims` to a flat index through `strides`.
#[inline]
fn source_index(mut flat: usize, out_dims: &[usize], strides: &[usize]) -> usize {
    let mut src = 0;
    for axis in (0..out_dims.len()).rev() {
        let d = out_dims[axis];
        src += (flat % d) * strides[axis];
        flat /= d;
    }
    src
}

/// Applies `f` pairwise with NumPy-style broadcasting.
pub fn broadcast_binary(
    op: &'static str,
    lhs: &[f32],
    lhs_shape: &Shape,
    rhs: &[f32],
    rhs_shape: &Shape,
    f: impl Fn(f32, f32) -> f32,
) -> Result<(Vec<f32>, Shape), TensorError> {
    let out_shape = lhs_shape
        .broadcast(rhs_shape)
        .ok_or_else(|| TensorError::ShapeMismatch {
            op,
            lhs: lhs_shape.clone(),
            rhs: rhs_shape.clone(),
        })?;
    if lhs_shape == rhs_shape {
        let out = lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect();
        return Ok((out, out_shape));
    }
    let rank = out_shape.rank();
    let ls = broadcast_strides(lhs_shape, rank);
    let rs = broadcast_strides(rhs_shape, rank);
    let dims = out_shape.dims();
    let out = (0..out_shape.num_elements())
        .map(|i| f(lhs[source_index(i, dims, &ls)], rhs[source_index(i, dims, &rs)]))
        .collect();
    Ok((out, out_shape))
}

/// Portable f32 matrix multiply of one `[m, k] x [k, n]` block.
///
/// Uses ikj loop order so the inner loop is a saxpy over a row of `c`.
pub fn matmul_f32(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            let c_row = &mut c[i * n..(i + 1) * n];
            let b_row = &b[p * n..(p + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
}

/// Batched matrix multiply: `[..., m, k] x [..., k, n]`, leading dims broadcast.
pub fn batched_matmul(
    lhs: &[f32],
    lhs_shape: &Shape,
    rhs: &[f32],
    rhs_shape: &Shape,
) -> Result<(Vec<f32>, Shape), TensorError> {
    let mismatch = || TensorError::ShapeMismatch {
        op: "matmul",
        lhs: lhs_shape.clone(),
        rhs: rhs_shape.clone(),
    };
    if !lhs_shape.is_matmul_compatible(rhs_shape) {
        return Err(mismatch());
    }
    let (ld, rd) = (lhs_shape.dims(), rhs_shape.dims());
    let (m, k, n) = (ld[ld.len() - 2], ld[ld.len() - 1], rd[rd.len() - 1]);
    let lhs_batch = Shape::new(ld[..ld.len() - 2].to_vec());
    let rhs_batch = Shape::new(rd[..rd.len() - 2].to_vec());
    let batch = lhs_batch.broadcast(&rhs_batch).ok_or_else(mismatch)?;

    let ls = broadcast_strides(&lhs_batch, batch.rank());
    let rs = broadcast_strides(&rhs_batch, batch.rank());
    let mut out = vec![0.0f32; batch.num_elements() * m * n];
    for b in 0..batch.num_elements() {
        let li = source_index(b, batch.dims(), &ls) * m * k;
        let ri = source_index(b, batch.dims(), &rs) * k * n;
        matmul_f32(
            &lhs[li..li + m * k],
            &rhs[ri..ri + k * n],
            &mut out[b * m * n..(b + 1) * m * n],
            m,
            k,
            n,
        );
    }
    let mut dims = batch.dims().to_vec();
    dims.extend_from_slice(&[m, n]);
    Ok((out, Shape::new(dims)))
}

/// Numerically stable softmax along `axis`.
pub fn softmax_axis(data: &[f32], shape: &Shape, axis: usize) -> Vec<f32> {
    let dims = shape.dims();
    if dims.is_empty() {
        return vec![1.0; data.len()];
    }
    let len = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let outer: usize = dims[..axis].iter().product();
    let mut out = vec![0.0f32; data.len()];
    if len == 0 {
        return out;
    }
    for o in 0..outer {
        for i in 0..inner {
            let base = o * len * inner + i;
            let at = |j: usize| base + j * inner;
            let max_val = (0..len).map(|j| data[at(j)]).fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for j in 0..len {
                let e = (data[at(j)] - max_val).exp();
                out[at(j)] = e;
                sum += e;
            }
            if sum > 0.0 {
                let inv_sum = 1.0 / sum;
                for j in 0..len {
                    out[at(j)] *= inv_sum;
                }
            }
        }
    }
    out
}

/// Arithmetic mean over `axes`.
pub fn reduce_mean(
    data: &[f32],
    shape: &Shape,
    axes: &[usize],
    keep_dims: bool,
) -> (Vec<f32>, Shape) {
    let dims = shape.dims();
    let kept: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
        .collect();
    let kept_shape = Shape::new(kept);
    let count: usize = axes.iter().map(|&a| dims[a]).product();

    // Accumulate through the keep-dims layout; reduced axes get stride 0.
    let strides = broadcast_strides(&kept_shape, dims.len());
    let mut out = vec![0.0f32; kept_shape.num_elements()];
    for (i, &v) in data.iter().enumerate() {
        out[source_index(i, dims, &strides)] += v;
    }
    if count > 0 {
        let inv = 1.0 / count as f32;
        out.iter_mut().for_each(|x| *x *= inv);
    }

    let out_shape = if keep_dims {
        kept_shape
    } else {
        Shape::new(
            dims.iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, &d)| d)
                .collect(),
        )
    };
    (out, out_shape)
}

/// Reorders dimensions: output dim `i` is input dim `perm[i]`.
pub fn permute(data: &[f32], shape: &Shape, perm: &[usize]) -> (Vec<f32>, Shape) {
    let dims = shape.dims();
    let strides = shape.strides();
    let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let out_strides: Vec<usize> = perm.iter().map(|&p| strides[p]).collect();
    let out: Vec<f32> = (0..data.len())
        .map(|i| data[source_index(i, &out_dims, &out_strides)])
        .collect();
    (out, Shape::new(out_dims))
}

/// Normalises each contiguous row of `row_len` values to zero mean and unit variance.
pub fn normalize_rows(data: &[f32], row_len: usize, eps: f32) -> Vec<f32> {
    let mut out = vec![0.0f32; data.len()];
    if row_len == 0 {
        return out;
    }
    for (src, dst) in data.chunks_exact(row_len).zip(out.chunks_exact_mut(row_len)) {
        let mean = src.iter().sum::<f32>() / row_len as f32;
        let var = src.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / row_len as f32;
        let inv_std = 1.0 / (var + eps).sqrt();
        for (d, &x) in dst.iter_mut().zip(src) {
            *d = (x - mean) * inv_std;
        }
    }
    out
}
