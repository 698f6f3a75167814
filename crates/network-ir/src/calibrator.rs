// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! INT8 calibration plug-in interface.
//!
//! The builder pulls representative batches from a [`Calibrator`], runs them
//! through the network in full precision, and derives a symmetric dynamic
//! range per tensor from the observed activations.

use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tensor_core::DataPtr;

/// How a dynamic range is derived from observed activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationAlgorithm {
    /// 99.9th percentile of absolute values.
    Legacy,
    /// 99.99th percentile of absolute values.
    Entropy,
    /// 99.99th percentile of absolute values.
    #[default]
    Entropy2,
    /// Largest absolute value.
    MinMax,
}

impl CalibrationAlgorithm {
    /// Range covering the observed absolute values.
    pub fn range(self, abs_values: &mut [f32]) -> f32 {
        if abs_values.is_empty() {
            return 0.0;
        }
        abs_values.sort_unstable_by(f32::total_cmp);
        let percentile = match self {
            CalibrationAlgorithm::MinMax => return abs_values[abs_values.len() - 1],
            CalibrationAlgorithm::Legacy => 0.999,
            CalibrationAlgorithm::Entropy | CalibrationAlgorithm::Entropy2 => 0.9999,
        };
        let rank = ((abs_values.len() - 1) as f64 * percentile).round() as usize;
        abs_values[rank]
    }
}

/// Source of calibration batches.
pub trait Calibrator {
    /// Rows per batch returned by [`Calibrator::next_batch`].
    fn batch_size(&self) -> usize;

    fn algorithm(&self) -> CalibrationAlgorithm {
        CalibrationAlgorithm::default()
    }

    /// Returns one buffer per input name, in the given order, or `None`
    /// once the dataset is exhausted.
    fn next_batch(&mut self, input_names: &[String]) -> Result<Option<Vec<DataPtr>>, EngineError>;

    /// Previously computed ranges; skips calibration when present.
    fn read_calibration_cache(&self) -> Option<Vec<u8>> {
        None
    }

    fn write_calibration_cache(&mut self, _cache: &[u8]) {}
}

/// Encodes per-tensor ranges for [`Calibrator::write_calibration_cache`].
pub fn encode_cache(ranges: &BTreeMap<String, f32>) -> Vec<u8> {
    serde_json::to_vec(ranges).unwrap_or_default()
}

pub fn decode_cache(cache: &[u8]) -> Result<BTreeMap<String, f32>, EngineError> {
    serde_json::from_slice(cache).map_err(|e| EngineError::Calibration(format!("bad calibration cache: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minmax_takes_largest() {
        let mut v = vec![0.5, 3.0, 1.0];
        assert_eq!(CalibrationAlgorithm::MinMax.range(&mut v), 3.0);
    }

    #[test]
    fn test_percentile_ignores_outlier() {
        let mut v: Vec<f32> = (0..10_000).map(|i| (i % 100) as f32 / 100.0).collect();
        v.push(1000.0);
        let r = CalibrationAlgorithm::Legacy.range(&mut v);
        assert!(r < 1.0, "outlier should be clipped, got {r}");
        assert_eq!(CalibrationAlgorithm::Entropy2.range(&mut []), 0.0);
    }

    #[test]
    fn test_cache_round_trip() {
        let mut ranges = BTreeMap::new();
        ranges.insert("x".to_string(), 2.5f32);
        assert_eq!(decode_cache(&encode_cache(&ranges)).unwrap(), ranges);
        assert!(decode_cache(b"not json").is_err());
    }
}
