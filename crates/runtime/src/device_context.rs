// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The single hardware context and the models loaded into it.
//!
//! A [`DeviceContext`] owns its accelerator. Every method takes `&mut self`,
//! so at most one inference is in flight per context; share a context
//! across threads by wrapping it in a `Mutex`.
//!
//! Lifecycle of a loaded model:
//!
//! ```text
//! load ──► allocate(arena_size) ──► write parameter image
//! infer ─► quantize inputs ──► submit ──► wait(timeout) ──► dequantize outputs
//! unload ► free arena
//! ```
//!
//! A wait that times out leaves the device in an unknown state; the
//! context refuses further work until it is closed and reopened.

use crate::metrics::ModelProfile;
use crate::RuntimeError;
use device::{Accelerator, ExecutionMode, Grant, SubmitRequest, WaitStatus};
use executable::{ExecutableModel, TensorDescriptor};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tensor_core::fixed::{decode_ints, dequantize, encode_ints, quantize};
use tensor_core::Tensor;

/// Identifier of a model loaded into a [`DeviceContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelHandle(pub u64);

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Session settings fixed at open time.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub wait_timeout: Duration,
    pub mode: ExecutionMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(1),
            mode: ExecutionMode::Auto,
        }
    }
}

pub(crate) struct LoadedModel {
    pub(crate) model: ExecutableModel,
    pub(crate) grant: Grant,
    pub(crate) profile: Option<ModelProfile>,
}

/// An open accelerator session.
pub struct DeviceContext {
    accelerator: Box<dyn Accelerator>,
    options: SessionOptions,
    pub(crate) models: BTreeMap<ModelHandle, LoadedModel>,
    next_handle: u64,
    open: bool,
    poisoned: bool,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.accelerator.capabilities().name)
            .field("options", &self.options)
            .field("models", &self.handles())
            .field("open", &self.open)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl DeviceContext {
    /// Opens the accelerator. Fails with `DeviceUnavailable` if it does not
    /// respond.
    pub fn open(
        mut accelerator: Box<dyn Accelerator>,
        options: SessionOptions,
    ) -> Result<Self, RuntimeError> {
        accelerator.open()?;
        let caps = accelerator.capabilities();
        tracing::info!(
            device = %caps.name,
            memory = %caps.memory,
            granularity = caps.allocation_granularity,
            mode = %options.mode,
            "device context opened"
        );
        Ok(Self {
            accelerator,
            options,
            models: BTreeMap::new(),
            next_handle: 1,
            open: true,
            poisoned: false,
        })
    }

    /// Reopens a closed context. Loaded models do not survive a close.
    pub fn reopen(&mut self) -> Result<(), RuntimeError> {
        self.close();
        self.accelerator.open()?;
        self.open = true;
        self.poisoned = false;
        tracing::info!("device context reopened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether a timeout has made the session unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn capabilities(&self) -> device::Capabilities {
        self.accelerator.capabilities()
    }

    /// Allocates the model's arena and copies its parameter image.
    ///
    /// All later addressing is checked against the granted size, which may
    /// exceed the request.
    pub fn load(&mut self, model: ExecutableModel, profiling: bool) -> Result<ModelHandle, RuntimeError> {
        self.ensure_usable()?;
        model
            .check_layout()
            .map_err(|e| RuntimeError::InvalidInput(format!("model '{}': {e}", model.name)))?;

        let grant = self.accelerator.allocate(model.arena_size.max(1))?;
        if grant.granted < model.arena_size {
            let _ = self.accelerator.free(grant.handle);
            return Err(RuntimeError::InvalidInput(format!(
                "device granted {} bytes for an arena of {}",
                grant.granted, model.arena_size
            )));
        }
        if !model.parameters.is_empty() {
            if let Err(e) = self.accelerator.write(grant.handle, 0, &model.parameters) {
                let _ = self.accelerator.free(grant.handle);
                return Err(e.into());
            }
        }

        let handle = ModelHandle(self.next_handle);
        self.next_handle += 1;
        tracing::info!(
            %handle,
            model = %model.name,
            requested = grant.requested,
            granted = grant.granted,
            profiling,
            "model loaded"
        );
        let profile = profiling.then(|| ModelProfile::new(&model));
        self.models.insert(
            handle,
            LoadedModel {
                model,
                grant,
                profile,
            },
        );
        Ok(handle)
    }

    /// Frees a model's arena.
    pub fn unload(&mut self, handle: ModelHandle) -> Result<(), RuntimeError> {
        let loaded = self
            .models
            .remove(&handle)
            .ok_or(RuntimeError::UnknownModel(handle.0))?;
        if self.open {
            self.accelerator.free(loaded.grant.handle)?;
        }
        tracing::info!(%handle, "model unloaded");
        Ok(())
    }

    /// Runs one inference. `inputs` are matched to the model's inputs by
    /// position and quantized with each input's scale.
    pub fn infer(&mut self, handle: ModelHandle, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError> {
        self.ensure_usable()?;
        let loaded = self
            .models
            .get(&handle)
            .ok_or(RuntimeError::UnknownModel(handle.0))?;
        let model = &loaded.model;
        let arena = loaded.grant.handle;
        let granted = loaded.grant.granted;

        if inputs.len() != model.inputs.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "model '{}' takes {} inputs, got {}",
                model.name,
                model.inputs.len(),
                inputs.len()
            )));
        }
        for (desc, tensor) in model.inputs.iter().zip(inputs) {
            let bytes = quantize_input(desc, tensor)?;
            let offset = tensor_offset(model, desc, granted)?;
            self.accelerator.write(arena, offset, &bytes)?;
        }

        let profiling = loaded.profile.is_some();
        let request = self.accelerator.submit(SubmitRequest {
            arena,
            model,
            mode: self.options.mode,
            profiling,
        })?;
        let timeout = self.options.wait_timeout;
        let (status, perf) = if profiling {
            let (status, perf) = self.accelerator.wait_with_perf(request, timeout)?;
            (status, Some(perf))
        } else {
            (self.accelerator.wait(request, timeout)?, None)
        };
        if status == WaitStatus::TimedOut {
            self.poisoned = true;
            tracing::error!(%handle, ?timeout, "inference timed out; session poisoned");
            return Err(RuntimeError::Timeout(timeout));
        }

        let loaded = self
            .models
            .get_mut(&handle)
            .ok_or(RuntimeError::UnknownModel(handle.0))?;
        if let (Some(profile), Some(perf)) = (loaded.profile.as_mut(), perf.as_ref()) {
            profile.record(perf);
        }

        let model = &loaded.model;
        let mut outputs = Vec::with_capacity(model.outputs.len());
        for desc in &model.outputs {
            let offset = tensor_offset(model, desc, granted)?;
            let len = desc.tensor.len as usize * desc.dtype.size_bytes();
            let bytes = self.accelerator.read(arena, offset, len)?;
            let values: Vec<f32> = decode_ints(&bytes, desc.dtype)
                .into_iter()
                .map(|q| dequantize(q, desc.scale) as f32)
                .collect();
            outputs.push(Tensor::from_vec(desc.shape.clone(), values)?);
        }
        tracing::debug!(%handle, outputs = outputs.len(), "inference complete");
        Ok(outputs)
    }

    /// The compiled model behind a handle.
    pub fn model(&self, handle: ModelHandle) -> Result<&ExecutableModel, RuntimeError> {
        self.loaded(handle).map(|l| &l.model)
    }

    /// Handles of every loaded model, in load order.
    pub fn handles(&self) -> Vec<ModelHandle> {
        self.models.keys().copied().collect()
    }

    /// Asks the accelerator for its native description of a loaded model.
    pub fn dump_native(&mut self, handle: ModelHandle) -> Result<Vec<u8>, RuntimeError> {
        self.ensure_usable()?;
        let loaded = self
            .models
            .get(&handle)
            .ok_or(RuntimeError::UnknownModel(handle.0))?;
        Ok(self.accelerator.dump(loaded.grant.handle, &loaded.model)?)
    }

    /// Releases every arena and the hardware context. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        let count = self.models.len();
        self.models.clear();
        self.accelerator.close();
        self.open = false;
        tracing::info!(models = count, "device context closed");
    }

    /// Closes the context and hands back the accelerator.
    pub fn into_accelerator(mut self) -> Box<dyn Accelerator> {
        self.close();
        self.accelerator
    }

    pub(crate) fn loaded(&self, handle: ModelHandle) -> Result<&LoadedModel, RuntimeError> {
        self.models
            .get(&handle)
            .ok_or(RuntimeError::UnknownModel(handle.0))
    }

    pub(crate) fn accelerator_ref(&self) -> &dyn Accelerator {
        self.accelerator.as_ref()
    }

    pub(crate) fn accelerator_mut(&mut self) -> &mut dyn Accelerator {
        self.accelerator.as_mut()
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), RuntimeError> {
        if self.poisoned {
            Err(RuntimeError::SessionPoisoned)
        } else if !self.open {
            Err(device::DeviceError::NotOpen.into())
        } else {
            Ok(())
        }
    }
}

fn quantize_input(desc: &TensorDescriptor, tensor: &Tensor) -> Result<Vec<u8>, RuntimeError> {
    let expected = desc.tensor.len as usize;
    if tensor.len() != expected {
        return Err(RuntimeError::InvalidInput(format!(
            "input '{}' needs {} values, got {}",
            desc.name,
            expected,
            tensor.len()
        )));
    }
    tensor.check_finite("infer")?;
    let mut saturated = 0usize;
    let ints: Vec<i64> = tensor
        .as_f32_slice()
        .iter()
        .map(|&x| {
            let (q, sat) = quantize(x as f64, desc.scale, desc.dtype);
            saturated += sat as usize;
            q
        })
        .collect();
    if saturated > 0 {
        tracing::warn!(input = %desc.name, saturated, "input values saturated");
    }
    Ok(encode_ints(&ints, desc.dtype))
}

/// Byte offset of a descriptor's tensor, checked against the granted size.
fn tensor_offset(
    model: &ExecutableModel,
    desc: &TensorDescriptor,
    granted: u64,
) -> Result<u64, RuntimeError> {
    match model.byte_span(&desc.tensor) {
        Some((start, end)) if end <= granted => Ok(start),
        _ => Err(RuntimeError::InvalidInput(format!(
            "tensor '{}' lies outside the granted arena of {granted} bytes",
            desc.name
        ))),
    }
}
