// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The `Module` abstraction: something with a forward pass and persistent state.

use crate::{StateDict, Tensor, TensorError};

/// What a forward pass returns.
#[derive(Debug, Clone)]
pub enum ModuleOutput {
    Single(Tensor),
    Tuple(Vec<Tensor>),
}

impl ModuleOutput {
    /// Output tensors in order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            ModuleOutput::Single(t) => vec![t],
            ModuleOutput::Tuple(ts) => ts.iter().collect(),
        }
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        match self {
            ModuleOutput::Single(t) => vec![t],
            ModuleOutput::Tuple(ts) => ts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ModuleOutput::Single(_) => 1,
            ModuleOutput::Tuple(ts) => ts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the single output, or `None` for a tuple.
    pub fn single(&self) -> Option<&Tensor> {
        match self {
            ModuleOutput::Single(t) => Some(t),
            ModuleOutput::Tuple(_) => None,
        }
    }
}

impl From<Tensor> for ModuleOutput {
    fn from(t: Tensor) -> Self {
        ModuleOutput::Single(t)
    }
}

/// A computation with a forward pass and (optionally) persistent state.
///
/// State is exchanged through a flat [`StateDict`]; each module writes and
/// reads its entries under `prefix`, so containers can nest modules.
pub trait Module {
    fn forward(&self, inputs: &[Tensor]) -> Result<ModuleOutput, TensorError>;

    /// Writes this module's persistent state into `dest`.
    fn state_dict(&self, _dest: &mut StateDict, _prefix: &str) {}

    /// Restores state previously written by [`Module::state_dict`].
    fn load_state_dict(&mut self, _state: &StateDict, _prefix: &str) -> Result<(), TensorError> {
        Ok(())
    }
}

/// A stateless module backed by a closure.
pub struct FnModule<F> {
    f: F,
}

impl<F> FnModule<F>
where
    F: Fn(&[Tensor]) -> Result<ModuleOutput, TensorError>,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Module for FnModule<F>
where
    F: Fn(&[Tensor]) -> Result<ModuleOutput, TensorError>,
{
    fn forward(&self, inputs: &[Tensor]) -> Result<ModuleOutput, TensorError> {
        (self.f)(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ops, Shape};

    #[test]
    fn test_fn_module_forward() {
        let m = FnModule::new(|xs: &[Tensor]| Ok(ops::relu(&xs[0])?.into()));
        let x = Tensor::from_f32(Shape::vector(2), &[-1.0, 1.0]).unwrap();
        let out = m.forward(&[x]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.single().unwrap().to_f32_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_tuple_output() {
        let a = Tensor::zeros(Shape::vector(1), crate::DType::F32);
        let out = ModuleOutput::Tuple(vec![a.clone(), a]);
        assert_eq!(out.tensors().len(), 2);
        assert!(out.single().is_none());
    }
}
