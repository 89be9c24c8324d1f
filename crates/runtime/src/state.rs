// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Recurrent state buffers of loaded models.
//!
//! Each memory-read/memory-write pair of the source graph owns one state
//! region in the model's arena. Handles are listed in declaration order and
//! address exactly one region, so resetting one state never touches
//! another.

use crate::device_context::{DeviceContext, ModelHandle};
use crate::RuntimeError;
use executable::{MemoryRegion, StateDescriptor};
use std::fmt;
use tensor_core::fixed::{decode_ints, dequantize, encode_ints, quantize};
use tensor_core::Tensor;

/// Reference to one state buffer of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateHandle {
    pub model: ModelHandle,
    /// Position in declaration order.
    pub index: usize,
    pub name: String,
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.name)
    }
}

impl DeviceContext {
    /// Lists the state buffers of a model; empty for stateless models.
    pub fn states(&self, handle: ModelHandle) -> Result<Vec<StateHandle>, RuntimeError> {
        let model = self.model(handle)?;
        Ok(model
            .states
            .iter()
            .enumerate()
            .map(|(index, s)| StateHandle {
                model: handle,
                index,
                name: s.name.clone(),
            })
            .collect())
    }

    /// Zeroes one state buffer without reloading the model.
    pub fn reset_state(&mut self, state: &StateHandle) -> Result<(), RuntimeError> {
        self.ensure_usable()?;
        let (arena, region) = self.resolve_state(state).map(|(a, _, r)| (a, r.clone()))?;
        self.accelerator_mut()
            .write(arena, region.offset, &vec![0u8; region.size as usize])?;
        tracing::debug!(%state, bytes = region.size, "state reset");
        Ok(())
    }

    /// Reads the current contents of a state buffer as real values.
    pub fn read_state(&self, state: &StateHandle) -> Result<Tensor, RuntimeError> {
        self.ensure_usable()?;
        let (arena, desc, region) = self.resolve_state(state)?;
        let bytes = self
            .accelerator_ref()
            .read(arena, region.offset, region.size as usize)?;
        let values = decode_ints(&bytes, region.dtype)
            .into_iter()
            .map(|q| dequantize(q, desc.scale) as f32)
            .collect();
        Ok(Tensor::from_vec(desc.shape.clone(), values)?)
    }

    /// Overwrites a state buffer, quantizing with the state's scale.
    pub fn write_state(&mut self, state: &StateHandle, value: &Tensor) -> Result<(), RuntimeError> {
        self.ensure_usable()?;
        let (arena, desc, region) = self.resolve_state(state)?;
        let expected = region.num_elements() as usize;
        if value.len() != expected {
            return Err(RuntimeError::InvalidInput(format!(
                "state '{}' holds {} values, got {}",
                desc.name,
                expected,
                value.len()
            )));
        }
        value.check_finite("write_state")?;
        let ints: Vec<i64> = value
            .as_f32_slice()
            .iter()
            .map(|&x| quantize(x as f64, desc.scale, region.dtype).0)
            .collect();
        let bytes = encode_ints(&ints, region.dtype);
        let offset = region.offset;
        self.accelerator_mut().write(arena, offset, &bytes)?;
        Ok(())
    }

    fn resolve_state(
        &self,
        state: &StateHandle,
    ) -> Result<(device::ArenaHandle, &StateDescriptor, &MemoryRegion), RuntimeError> {
        let loaded = self.loaded(state.model)?;
        let desc = loaded
            .model
            .states
            .get(state.index)
            .filter(|d| d.name == state.name)
            .ok_or_else(|| RuntimeError::InvalidInput(format!("stale state handle {state}")))?;
        let region = loaded.model.region(desc.region).ok_or_else(|| {
            RuntimeError::InvalidInput(format!("state '{}' has no region", desc.name))
        })?;
        Ok((loaded.grant.handle, desc, region))
    }
}
