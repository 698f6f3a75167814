// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host ↔ network element type and location mapping.

use crate::ConvertError;
use network_ir::{DataType, TensorLocation};
use tensor_core::{DType, Device};

/// Network element type for a host dtype. `i64` narrows to `Int32`.
pub fn data_type(dtype: DType) -> Result<DataType, ConvertError> {
    match dtype {
        DType::Bool => Ok(DataType::Bool),
        DType::I8 => Ok(DataType::Int8),
        DType::I32 | DType::I64 => Ok(DataType::Int32),
        DType::F16 => Ok(DataType::Half),
        DType::F32 => Ok(DataType::Float),
        DType::BF16 => Err(ConvertError::UnsupportedDType(dtype)),
    }
}

/// Host dtype for a network element type.
pub fn host_dtype(dtype: DataType) -> DType {
    match dtype {
        DataType::Bool => DType::Bool,
        DataType::Int8 => DType::I8,
        DataType::Int32 => DType::I32,
        DataType::Half => DType::F16,
        DataType::Float => DType::F32,
    }
}

pub fn location(device: Device) -> Result<TensorLocation, ConvertError> {
    match device {
        Device::Gpu(_) => Ok(TensorLocation::Device),
        Device::Cpu => Ok(TensorLocation::Host),
        other => Err(ConvertError::UnsupportedDevice(other)),
    }
}

pub fn device(location: TensorLocation) -> Device {
    match location {
        TensorLocation::Device => Device::Gpu(0),
        TensorLocation::Host => Device::Cpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_mapping() {
        assert_eq!(data_type(DType::F32).unwrap(), DataType::Float);
        assert_eq!(data_type(DType::I64).unwrap(), DataType::Int32);
        assert!(matches!(data_type(DType::BF16), Err(ConvertError::UnsupportedDType(DType::BF16))));
        assert_eq!(host_dtype(DataType::Half), DType::F16);
    }

    #[test]
    fn test_location_mapping() {
        assert_eq!(location(Device::Gpu(1)).unwrap(), TensorLocation::Device);
        assert_eq!(location(Device::Cpu).unwrap(), TensorLocation::Host);
        assert!(location(Device::Meta).is_err());
        assert_eq!(device(TensorLocation::Host), Device::Cpu);
    }
}
