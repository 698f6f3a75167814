// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Persistent module state.
//!
//! A [`StateDict`] is a flat, ordered mapping from dotted keys to values.
//! On disk it is a SafeTensors file: tensors and raw byte blobs become
//! SafeTensors entries (blobs as 1-D `U8`), string lists live in the header
//! metadata as JSON.

use crate::{DType, Shape, Tensor, TensorError};
use safetensors::tensor::TensorView;
use safetensors::{Dtype as StDtype, SafeTensors};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Metadata key prefix for string-list entries.
const STRINGS_PREFIX: &str = "strings:";

/// One entry of a state dict.
#[derive(Debug, Clone)]
pub enum StateValue {
    Tensor(Tensor),
    Bytes(Vec<u8>),
    Strings(Vec<String>),
}

/// Flat, ordered module state.
#[derive(Debug, Clone, Default)]
pub struct StateDict {
    entries: BTreeMap<String, StateValue>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: StateValue) -> Option<StateValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tensor(&self, key: &str) -> Option<&Tensor> {
        match self.entries.get(key) {
            Some(StateValue::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(StateValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn strings(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key) {
            Some(StateValue::Strings(s)) => Some(s),
            _ => None,
        }
    }

    /// Serializes to the SafeTensors byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TensorError> {
        let (buffers, metadata) = self.encode_entries();
        let views = Self::views(&buffers)?;
        safetensors::serialize(views, &metadata).map_err(persistence)
    }

    /// Parses the SafeTensors byte layout.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, TensorError> {
        let (_, header) = SafeTensors::read_metadata(buffer).map_err(persistence)?;
        let st = SafeTensors::deserialize(buffer).map_err(persistence)?;

        let mut dict = StateDict::new();
        for (name, view) in st.tensors() {
            let value = match view.dtype() {
                StDtype::U8 => StateValue::Bytes(view.data().to_vec()),
                other => {
                    let dtype = from_st_dtype(other)?;
                    let shape = Shape::new(view.shape().to_vec());
                    StateValue::Tensor(Tensor::from_bytes(shape, dtype, view.data().to_vec())?)
                }
            };
            dict.insert(name, value);
        }
        if let Some(metadata) = header.metadata() {
            for (key, json) in metadata {
                if let Some(name) = key.strip_prefix(STRINGS_PREFIX) {
                    let strings: Vec<String> = serde_json::from_str(json)
                        .map_err(|e| TensorError::Persistence(format!("entry '{name}': {e}")))?;
                    dict.insert(name, StateValue::Strings(strings));
                }
            }
        }
        Ok(dict)
    }

    /// Writes the state dict to a SafeTensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TensorError> {
        let path = path.as_ref();
        let (buffers, metadata) = self.encode_entries();
        let views = Self::views(&buffers)?;
        safetensors::tensor::serialize_to_file(views, &metadata, path).map_err(|e| {
            TensorError::Persistence(format!("cannot write '{}': {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), entries = self.len(), "saved state dict");
        Ok(())
    }

    /// Reads a state dict from a SafeTensors file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TensorError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            TensorError::Persistence(format!("cannot open '{}': {e}", path.display()))
        })?;

        // Memory-map the file so tensor payloads are copied only once.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| TensorError::Persistence(format!("mmap failed: {e}")))?;
        Self::from_bytes(&mmap)
    }

    /// Flattens entries into owned byte buffers plus header metadata.
    #[allow(clippy::type_complexity)]
    fn encode_entries(
        &self,
    ) -> (Vec<(String, StDtype, Vec<usize>, Vec<u8>)>, Option<HashMap<String, String>>) {
        let mut buffers = Vec::new();
        let mut metadata = HashMap::new();
        for (key, value) in &self.entries {
            match value {
                StateValue::Tensor(t) => buffers.push((
                    key.clone(),
                    to_st_dtype(t.dtype()),
                    t.shape().dims().to_vec(),
                    t.to_bytes(),
                )),
                StateValue::Bytes(b) => buffers.push((key.clone(), StDtype::U8, vec![b.len()], b.clone())),
                StateValue::Strings(s) => {
                    // Serializing a Vec<String> to JSON cannot fail.
                    let json = serde_json::to_string(s).unwrap_or_default();
                    metadata.insert(format!("{STRINGS_PREFIX}{key}"), json);
                }
            }
        }
        let metadata = (!metadata.is_empty()).then_some(metadata);
        (buffers, metadata)
    }

    fn views(
        buffers: &[(String, StDtype, Vec<usize>, Vec<u8>)],
    ) -> Result<Vec<(String, TensorView<'_>)>, TensorError> {
        buffers
            .iter()
            .map(|(name, dtype, shape, data)| {
                TensorView::new(*dtype, shape.clone(), data)
                    .map(|view| (name.clone(), view))
                    .map_err(persistence)
            })
            .collect()
    }
}

fn persistence(e: safetensors::SafeTensorError) -> TensorError {
    TensorError::Persistence(e.to_string())
}

fn to_st_dtype(dtype: DType) -> StDtype {
    match dtype {
        DType::F32 => StDtype::F32,
        DType::F16 => StDtype::F16,
        DType::BF16 => StDtype::BF16,
        DType::I8 => StDtype::I8,
        DType::I32 => StDtype::I32,
        DType::I64 => StDtype::I64,
        DType::Bool => StDtype::BOOL,
    }
}

fn from_st_dtype(dtype: StDtype) -> Result<DType, TensorError> {
    match dtype {
        StDtype::F32 => Ok(DType::F32),
        StDtype::F16 => Ok(DType::F16),
        StDtype::BF16 => Ok(DType::BF16),
        StDtype::I8 => Ok(DType::I8),
        StDtype::I32 => Ok(DType::I32),
        StDtype::I64 => Ok(DType::I64),
        StDtype::BOOL => Ok(DType::Bool),
        other => Err(TensorError::Persistence(format!("unsupported stored dtype {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateDict {
        let mut dict = StateDict::new();
        let w = Tensor::from_f32(Shape::matrix(2, 2), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        dict.insert("layer.weight", StateValue::Tensor(w));
        dict.insert("blob", StateValue::Bytes(vec![7, 8, 9]));
        dict.insert("names", StateValue::Strings(vec!["a".into(), "b".into()]));
        dict
    }

    #[test]
    fn test_bytes_round_trip() {
        let restored = StateDict::from_bytes(&sample().to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.bytes("blob"), Some(&[7u8, 8, 9][..]));
        assert_eq!(restored.strings("names").unwrap(), &["a".to_string(), "b".to_string()]);
        let w = restored.tensor("layer.weight").unwrap();
        assert_eq!(w.shape(), &Shape::matrix(2, 2));
        assert_eq!(w.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.safetensors");
        sample().save(&path).unwrap();
        let restored = StateDict::load(&path).unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["blob", "layer.weight", "names"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StateDict::load(dir.path().join("nope.safetensors")).unwrap_err();
        assert!(matches!(err, TensorError::Persistence(_)));
    }

    #[test]
    fn test_typed_getters_check_kind() {
        let dict = sample();
        assert!(dict.tensor("blob").is_none());
        assert!(dict.bytes("names").is_none());
        assert!(dict.contains_key("layer.weight"));
    }
}
