// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type and its shared storage.
//!
//! A [`Tensor`] is a reference-like handle: cloning it yields another handle
//! to the *same* tensor (same [`TensorId`], same storage), the way two
//! variables can name one tensor object. [`Tensor::duplicate`] produces a
//! distinct tensor with copied contents.

use crate::{DType, Device, Shape, TensorError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a tensor.
///
/// Two tensors with equal contents still have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    fn next() -> Self {
        Self(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A shared handle to a tensor's backing buffer.
///
/// This is what an engine binds at execution time: the handle identifies a
/// buffer and allows the engine to read inputs from it and write outputs
/// into it.
#[derive(Clone)]
pub struct DataPtr {
    storage: Arc<RwLock<Vec<u8>>>,
}

impl DataPtr {
    /// Wraps a standalone buffer not owned by any tensor.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns the buffer address, stable for the buffer's lifetime.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.storage) as *const () as usize
    }

    /// Returns the buffer length in bytes.
    pub fn len(&self) -> usize {
        self.storage.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the buffer contents out.
    pub fn read_bytes(&self) -> Vec<u8> {
        self.storage.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Overwrites the buffer contents; `bytes` must match the buffer length.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), TensorError> {
        let mut guard = self.storage.write().unwrap_or_else(|e| e.into_inner());
        if guard.len() != bytes.len() {
            return Err(TensorError::BufferSizeMismatch {
                expected: guard.len(),
                actual: bytes.len(),
            });
        }
        guard.copy_from_slice(bytes);
        Ok(())
    }

    /// Returns `true` if both handles point at the same buffer.
    pub fn same_buffer(&self, other: &DataPtr) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl std::fmt::Debug for DataPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataPtr({:#x}, {} bytes)", self.addr(), self.len())
    }
}

/// An n-dimensional tensor stored in contiguous row-major memory.
///
/// # Memory Layout
/// Data is stored in row-major (C) order as a flat little-endian byte buffer.
/// Typed access goes through [`to_f32_vec`](Tensor::to_f32_vec).
#[derive(Clone)]
pub struct Tensor {
    id: TensorId,
    shape: Shape,
    dtype: DType,
    device: Device,
    storage: DataPtr,
}

impl Tensor {
    /// Creates a new tensor filled with zeros on the CPU.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.size_bytes(), 24); // 2 * 3 * 4 bytes
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        Self::empty(shape, dtype, Device::Cpu)
    }

    /// Allocates a zero-initialised tensor on `device`.
    pub fn empty(shape: Shape, dtype: DType, device: Device) -> Self {
        let size = shape.size_bytes(dtype);
        Self::from_parts(shape, dtype, device, vec![0u8; size])
    }

    /// Creates a tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self::from_parts(shape, dtype, Device::Cpu, data))
    }

    /// Creates a tensor from a slice of `f32` values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_values(shape, DType::F32, values)
    }

    /// Creates a tensor of `dtype` from `f32` values, converting each element.
    pub fn from_values(shape: Shape, dtype: DType, values: &[f32]) -> Result<Self, TensorError> {
        let expected_elements = shape.num_elements();
        if values.len() != expected_elements {
            return Err(TensorError::BufferSizeMismatch {
                expected: expected_elements * dtype.size_bytes(),
                actual: values.len() * dtype.size_bytes(),
            });
        }
        Ok(Self::from_parts(shape, dtype, Device::Cpu, dtype.encode(values)))
    }

    /// Creates a tensor with every element set to `value`.
    pub fn full(shape: Shape, dtype: DType, value: f32) -> Self {
        let values = vec![value; shape.num_elements()];
        let data = dtype.encode(&values);
        Self::from_parts(shape, dtype, Device::Cpu, data)
    }

    /// Moves the tensor's placement label without copying data.
    pub(crate) fn placed_on(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    fn from_parts(shape: Shape, dtype: DType, device: Device, data: Vec<u8>) -> Self {
        Self {
            id: TensorId::next(),
            shape,
            dtype,
            device,
            storage: DataPtr::new(data),
        }
    }

    /// Returns this tensor's identity.
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the device the tensor is placed on.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Returns the memory footprint of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// Returns a handle to the backing buffer.
    pub fn data_ptr(&self) -> DataPtr {
        self.storage.clone()
    }

    /// Tensors in this crate are always densely packed.
    pub fn is_contiguous(&self) -> bool {
        true
    }

    /// Copies the raw bytes out.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.storage.read_bytes()
    }

    /// Decodes all elements as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.dtype.decode(&self.storage.read_bytes())
    }

    /// Returns a distinct tensor with copied contents.
    pub fn duplicate(&self) -> Tensor {
        Self::from_parts(self.shape.clone(), self.dtype, self.device, self.to_bytes())
    }

    /// Returns a copy of this tensor placed on `device`.
    pub fn to_device(&self, device: Device) -> Tensor {
        Self::from_parts(self.shape.clone(), self.dtype, device, self.to_bytes())
    }

    /// Returns a tensor sharing this tensor's storage under a new shape.
    pub fn view_as(&self, shape: Shape) -> Result<Tensor, TensorError> {
        if shape.num_elements() != self.shape.num_elements() {
            return Err(TensorError::ShapeMismatch {
                op: "view",
                lhs: self.shape.clone(),
                rhs: shape,
            });
        }
        Ok(Self {
            id: TensorId::next(),
            shape,
            dtype: self.dtype,
            device: self.device,
            storage: self.storage.clone(),
        })
    }

    /// Copies `len` entries along the leading dimension starting at `start`.
    pub fn narrow_batch(&self, start: usize, len: usize) -> Result<Tensor, TensorError> {
        let batch = self.shape.dim(0).ok_or_else(|| {
            TensorError::invalid_argument("narrow_batch", "tensor has no leading dimension")
        })?;
        if start + len > batch {
            return Err(TensorError::invalid_argument(
                "narrow_batch",
                format!("range {start}..{} exceeds batch size {batch}", start + len),
            ));
        }
        let row_bytes = self.shape.without_batch().size_bytes(self.dtype);
        let bytes = self.storage.read_bytes();
        let data = bytes[start * row_bytes..(start + len) * row_bytes].to_vec();
        let mut dims = self.shape.dims().to_vec();
        dims[0] = len;
        Ok(Self::from_parts(Shape::new(dims), self.dtype, self.device, data))
    }

    /// Stacks tensors along their existing leading dimension.
    ///
    /// All parts must share dtype and trailing dimensions.
    pub fn concat_batch(parts: &[Tensor]) -> Result<Tensor, TensorError> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::invalid_argument("concat_batch", "no tensors given"))?;
        let row_shape = first.shape.without_batch();
        let mut batch = 0;
        let mut data = Vec::new();
        for part in parts {
            if part.dtype != first.dtype {
                return Err(TensorError::UnsupportedDType {
                    op: "concat_batch",
                    dtype: part.dtype,
                });
            }
            if part.shape.without_batch() != row_shape || part.rank() == 0 {
                return Err(TensorError::ShapeMismatch {
                    op: "concat_batch",
                    lhs: first.shape.clone(),
                    rhs: part.shape.clone(),
                });
            }
            batch += part.shape.dims()[0];
            data.extend_from_slice(&part.storage.read_bytes());
        }
        Ok(Self::from_parts(row_shape.with_batch(batch), first.dtype, first.device, data))
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id.0)
            .field("shape", &self.shape.dims())
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert_eq!(t.size_bytes(), 24);
        assert_eq!(t.shape(), &Shape::matrix(2, 3));
        assert_eq!(t.dtype(), DType::F32);
        assert!(t.to_f32_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = Tensor::from_bytes(Shape::matrix(2, 3), DType::F32, vec![0u8; 10]);
        assert!(result.is_err());
    }

    #[test]
    fn test_clone_keeps_identity() {
        let t = Tensor::from_f32(Shape::vector(2), &[1.0, 2.0]).unwrap();
        let alias = t.clone();
        assert_eq!(t.id(), alias.id());
        assert!(t.data_ptr().same_buffer(&alias.data_ptr()));

        let copy = t.duplicate();
        assert_ne!(t.id(), copy.id());
        assert!(!t.data_ptr().same_buffer(&copy.data_ptr()));
        assert_eq!(copy.to_f32_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_full_int() {
        let t = Tensor::full(Shape::vector(3), DType::I32, 7.0);
        assert_eq!(t.to_f32_vec(), vec![7.0, 7.0, 7.0]);
        assert_eq!(t.size_bytes(), 12);
    }

    #[test]
    fn test_narrow_and_concat_batch() {
        let t = Tensor::from_f32(Shape::matrix(3, 2), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let row = t.narrow_batch(1, 1).unwrap();
        assert_eq!(row.shape(), &Shape::matrix(1, 2));
        assert_eq!(row.to_f32_vec(), vec![3.0, 4.0]);

        let joined = Tensor::concat_batch(&[row.clone(), row]).unwrap();
        assert_eq!(joined.shape(), &Shape::matrix(2, 2));
        assert_eq!(joined.to_f32_vec(), vec![3.0, 4.0, 3.0, 4.0]);

        assert!(t.narrow_batch(2, 2).is_err());
    }

    #[test]
    fn test_view_shares_storage() {
        let t = Tensor::from_f32(Shape::vector(4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let v = t.view_as(Shape::matrix(2, 2)).unwrap();
        assert_ne!(t.id(), v.id());
        assert!(t.data_ptr().same_buffer(&v.data_ptr()));
        assert!(t.view_as(Shape::vector(3)).is_err());
    }

    #[test]
    fn test_data_ptr_write() {
        let t = Tensor::zeros(Shape::vector(2), DType::F32);
        t.data_ptr()
            .write_bytes(&DType::F32.encode(&[5.0, 6.0]))
            .unwrap();
        assert_eq!(t.to_f32_vec(), vec![5.0, 6.0]);
        assert!(t.data_ptr().write_bytes(&[0u8; 3]).is_err());
    }
}
