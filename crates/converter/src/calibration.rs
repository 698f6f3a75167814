// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Calibration data for INT8 builds.

use crate::dtype_map;
use crate::ConvertError;
use network_ir::{CalibrationAlgorithm, Calibrator, EngineError};
use tensor_core::{DataPtr, Tensor};

/// Representative inputs, one tensor per module input.
///
/// Every tensor shares the same leading (batch) dimension; row `i` of each
/// tensor together forms one sample.
#[derive(Debug, Clone)]
pub struct TensorBatchDataset {
    inputs: Vec<Tensor>,
    len: usize,
}

impl TensorBatchDataset {
    pub fn new(inputs: Vec<Tensor>) -> Result<Self, ConvertError> {
        let first = inputs
            .first()
            .ok_or_else(|| ConvertError::invalid_argument("calibration dataset", "no input tensors"))?;
        let len = first
            .shape()
            .dim(0)
            .ok_or_else(|| ConvertError::invalid_argument("calibration dataset", "inputs need a batch dimension"))?;
        if let Some(bad) = inputs.iter().find(|t| t.shape().dim(0) != Some(len)) {
            return Err(ConvertError::invalid_argument(
                "calibration dataset",
                format!("expected {len} samples, got input of shape {}", bad.shape()),
            ));
        }
        Ok(Self { inputs, len })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Samples `start..start + count` of every input.
    pub fn slice(&self, start: usize, count: usize) -> Result<Vec<Tensor>, ConvertError> {
        self.inputs
            .iter()
            .map(|t| t.narrow_batch(start, count).map_err(ConvertError::from))
            .collect()
    }
}

/// Feeds a [`TensorBatchDataset`] to the engine builder.
///
/// Only full batches are produced; a trailing partial batch is dropped.
#[derive(Debug)]
pub struct DatasetCalibrator {
    dataset: TensorBatchDataset,
    input_names: Vec<String>,
    batch_size: usize,
    algorithm: CalibrationAlgorithm,
    cursor: usize,
    cache: Option<Vec<u8>>,
}

impl DatasetCalibrator {
    /// `input_names` names the dataset's tensors in order.
    pub fn new(
        dataset: TensorBatchDataset,
        input_names: Vec<String>,
        batch_size: usize,
        algorithm: CalibrationAlgorithm,
    ) -> Result<Self, ConvertError> {
        if input_names.len() != dataset.num_inputs() {
            return Err(ConvertError::invalid_argument(
                "calibration dataset",
                format!("{} inputs but {} names", dataset.num_inputs(), input_names.len()),
            ));
        }
        let batch_size = batch_size.clamp(1, dataset.len().max(1));
        Ok(Self {
            dataset,
            input_names,
            batch_size,
            algorithm,
            cursor: 0,
            cache: None,
        })
    }

    /// Reuses ranges from an earlier calibration.
    pub fn with_cache(mut self, cache: Vec<u8>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Ranges written by the builder, if calibration ran.
    pub fn cache(&self) -> Option<&[u8]> {
        self.cache.as_deref()
    }

    fn buffer(tensor: &Tensor) -> Result<DataPtr, EngineError> {
        let storage = dtype_map::data_type(tensor.dtype())
            .map_err(|e| EngineError::Calibration(e.to_string()))?
            .storage();
        if storage == tensor.dtype() {
            return Ok(tensor.data_ptr());
        }
        Ok(DataPtr::new(storage.encode(&tensor.to_f32_vec())))
    }
}

impl Calibrator for DatasetCalibrator {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn algorithm(&self) -> CalibrationAlgorithm {
        self.algorithm
    }

    fn next_batch(&mut self, input_names: &[String]) -> Result<Option<Vec<DataPtr>>, EngineError> {
        if self.cursor + self.batch_size > self.dataset.len() {
            return Ok(None);
        }
        let batch = self
            .dataset
            .slice(self.cursor, self.batch_size)
            .map_err(|e| EngineError::Calibration(e.to_string()))?;
        self.cursor += self.batch_size;

        input_names
            .iter()
            .map(|name| {
                let index = self
                    .input_names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| EngineError::Calibration(format!("no calibration data for input '{name}'")))?;
                Self::buffer(&batch[index])
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn read_calibration_cache(&self) -> Option<Vec<u8>> {
        self.cache.clone()
    }

    fn write_calibration_cache(&mut self, cache: &[u8]) {
        self.cache = Some(cache.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape};

    fn dataset(rows: usize) -> TensorBatchDataset {
        let values: Vec<f32> = (0..rows * 2).map(|v| v as f32).collect();
        TensorBatchDataset::new(vec![Tensor::from_f32(Shape::matrix(rows, 2), &values).unwrap()]).unwrap()
    }

    #[test]
    fn test_dataset_rejects_ragged_inputs() {
        let a = Tensor::zeros(Shape::matrix(3, 2), DType::F32);
        let b = Tensor::zeros(Shape::matrix(2, 2), DType::F32);
        assert!(TensorBatchDataset::new(vec![a, b]).is_err());
        assert!(TensorBatchDataset::new(vec![]).is_err());
    }

    #[test]
    fn test_calibrator_yields_full_batches() {
        let mut calib =
            DatasetCalibrator::new(dataset(5), vec!["x".into()], 2, CalibrationAlgorithm::MinMax).unwrap();
        let names = vec!["x".to_string()];
        let first = calib.next_batch(&names).unwrap().unwrap();
        assert_eq!(first[0].len(), 2 * 2 * 4);
        assert!(calib.next_batch(&names).unwrap().is_some());
        assert!(calib.next_batch(&names).unwrap().is_none());
    }

    #[test]
    fn test_batch_size_clamped_to_dataset() {
        let calib = DatasetCalibrator::new(dataset(3), vec!["x".into()], 8, CalibrationAlgorithm::Entropy2).unwrap();
        assert_eq!(calib.batch_size(), 3);
    }

    #[test]
    fn test_unknown_input_name() {
        let mut calib = DatasetCalibrator::new(dataset(2), vec!["x".into()], 1, CalibrationAlgorithm::MinMax).unwrap();
        assert!(matches!(
            calib.next_batch(&["y".to_string()]),
            Err(EngineError::Calibration(_))
        ));
    }

    #[test]
    fn test_cache_round_trip() {
        let mut calib = DatasetCalibrator::new(dataset(1), vec!["x".into()], 1, CalibrationAlgorithm::MinMax)
            .unwrap()
            .with_cache(b"{}".to_vec());
        assert_eq!(calib.read_calibration_cache().as_deref(), Some(&b"{}"[..]));
        calib.write_calibration_cache(b"{\"x\":1.0}");
        assert_eq!(calib.cache(), Some(&b"{\"x\":1.0}"[..]));
    }
}
