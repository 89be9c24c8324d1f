// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The caller-facing engine with a type-state–enforced lifecycle.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .open()
//!     ▼
//! InferenceEngine<Ready> ── load_graph / load_aot / infer / export / ...
//!     │  .close()
//!     ▼
//! InferenceEngine<Idle>
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error.

use crate::compile::compile;
use crate::device_context::{DeviceContext, ModelHandle, SessionOptions};
use crate::metrics::PerfRecord;
use crate::state::StateHandle;
use crate::{RuntimeConfig, RuntimeError};
use device::{Accelerator, SimulatedAccelerator};
use executable::{aot, ExecutableModel};
use model_ir::{Graph, Validated};
use quantizer::QuantizationMetric;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tensor_core::Tensor;

// ── Type-state markers ─────────────────────────────────────────

/// The accelerator is not open.
pub struct Idle {
    accelerator: Box<dyn Accelerator>,
}

/// The accelerator is open and models can be loaded.
#[derive(Debug)]
pub struct Ready {
    context: DeviceContext,
    diagnostics: BTreeMap<ModelHandle, Vec<QuantizationMetric>>,
}

impl fmt::Debug for Idle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Idle")
            .field("device", &self.accelerator.capabilities().name)
            .finish()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Ready {}
}

/// Sealed trait for engine states.
pub trait EngineState: sealed::Sealed + fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Ready {}

// ── Engine ─────────────────────────────────────────────────────

/// The primary entry point of the runtime.
///
/// # Example
/// ```no_run
/// use runtime::{InferenceEngine, RuntimeConfig};
/// use std::path::Path;
///
/// # fn example() -> Result<(), runtime::RuntimeError> {
/// let mut engine = InferenceEngine::with_simulator(RuntimeConfig::default())?.open()?;
/// let model = engine.load_aot(Path::new("kws.aot"))?;
/// let input = tensor_core::Tensor::zeros(engine.model(model)?.inputs[0].shape.clone());
/// let outputs = engine.infer(model, &[input])?;
/// println!("{:?}", outputs[0].as_f32_slice());
/// engine.close();
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    state: S,
}

impl<S: EngineState> InferenceEngine<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

// ── Idle → Ready ───────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates an engine over the given accelerator backend.
    pub fn new(config: RuntimeConfig, accelerator: Box<dyn Accelerator>) -> Self {
        tracing::info!(
            device = %accelerator.capabilities().name,
            mode = %config.execution_mode,
            "engine created"
        );
        Self {
            config,
            state: Idle { accelerator },
        }
    }

    /// Creates an engine over a [`SimulatedAccelerator`] sized by the
    /// configuration.
    pub fn with_simulator(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let budget = config.parse_budget()?;
        let accelerator =
            SimulatedAccelerator::new(budget, config.hardware.allocation_granularity as u64)
                .with_alignment(config.hardware.alignment_bytes as u64);
        Ok(Self::new(config, Box::new(accelerator)))
    }

    /// Opens the accelerator. Fails with `DeviceUnavailable` when it does
    /// not respond.
    pub fn open(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let options = SessionOptions {
            wait_timeout: self.config.wait_timeout(),
            mode: self.config.execution_mode,
        };
        let context = DeviceContext::open(self.state.accelerator, options)?;
        Ok(InferenceEngine {
            config: self.config,
            state: Ready {
                context,
                diagnostics: BTreeMap::new(),
            },
        })
    }
}

// ── Ready ──────────────────────────────────────────────────────

impl InferenceEngine<Ready> {
    /// Compiles a source graph and loads it onto the device.
    pub fn load_graph(&mut self, graph: Graph<Validated>) -> Result<ModelHandle, RuntimeError> {
        let compilation = compile(graph, &self.config)?;
        let handle = self.load_model(compilation.model)?;
        self.state.diagnostics.insert(handle, compilation.metrics);
        Ok(handle)
    }

    /// Loads a previously exported AOT model, skipping compilation.
    pub fn load_aot(&mut self, path: &Path) -> Result<ModelHandle, RuntimeError> {
        let model = aot::import(path)?;
        tracing::info!(path = %path.display(), "{}", model.summary());
        self.load_model(model)
    }

    /// Loads an already compiled model.
    pub fn load_model(&mut self, model: ExecutableModel) -> Result<ModelHandle, RuntimeError> {
        self.state
            .context
            .load(model, self.config.enable_profiling)
    }

    pub fn unload(&mut self, handle: ModelHandle) -> Result<(), RuntimeError> {
        self.state.diagnostics.remove(&handle);
        self.state.context.unload(handle)
    }

    /// Runs one inference; inputs and outputs are real-valued.
    pub fn infer(&mut self, handle: ModelHandle, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError> {
        self.state.context.infer(handle, inputs)
    }

    /// Writes a loaded model to an AOT file.
    pub fn export(&self, handle: ModelHandle, path: &Path) -> Result<(), RuntimeError> {
        let model = self.state.context.model(handle)?;
        Ok(aot::export(model, path)?)
    }

    /// State buffers of a model, in declaration order. Empty for
    /// stateless models.
    pub fn query_state(&self, handle: ModelHandle) -> Result<Vec<StateHandle>, RuntimeError> {
        self.state.context.states(handle)
    }

    pub fn reset_state(&mut self, state: &StateHandle) -> Result<(), RuntimeError> {
        self.state.context.reset_state(state)
    }

    pub fn read_state(&self, state: &StateHandle) -> Result<Tensor, RuntimeError> {
        self.state.context.read_state(state)
    }

    pub fn write_state(&mut self, state: &StateHandle, value: &Tensor) -> Result<(), RuntimeError> {
        self.state.context.write_state(state, value)
    }

    /// Per-layer counters, accumulated over every inference. Empty unless
    /// profiling was enabled when the model was loaded.
    pub fn performance_counters(
        &self,
        handle: ModelHandle,
    ) -> Result<BTreeMap<String, PerfRecord>, RuntimeError> {
        self.state.context.collect(handle)
    }

    pub fn aggregate_counters(&self, handle: ModelHandle) -> Result<Option<PerfRecord>, RuntimeError> {
        self.state.context.aggregate(handle)
    }

    /// Multi-line profile table, if the model is profiled.
    pub fn profile_summary(&self, handle: ModelHandle) -> Result<Option<String>, RuntimeError> {
        Ok(self.state.context.profile(handle)?.map(|p| p.summary()))
    }

    /// Quantization diagnostics of a model loaded from a graph.
    pub fn quantization_metrics(&self, handle: ModelHandle) -> Option<&[QuantizationMetric]> {
        self.state.diagnostics.get(&handle).map(Vec::as_slice)
    }

    /// The accelerator's native description of a loaded model. Also
    /// written to `dump_path` when configured.
    pub fn dump_native(&mut self, handle: ModelHandle) -> Result<Vec<u8>, RuntimeError> {
        let bytes = self.state.context.dump_native(handle)?;
        if let Some(dir) = &self.config.dump_path {
            let path = dump_file(dir, &self.state.context.model(handle)?.name);
            std::fs::create_dir_all(dir)?;
            std::fs::write(&path, &bytes)?;
            tracing::info!(%handle, path = %path.display(), bytes = bytes.len(), "native dump written");
        }
        Ok(bytes)
    }

    pub fn model(&self, handle: ModelHandle) -> Result<&ExecutableModel, RuntimeError> {
        self.state.context.model(handle)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.state.context
    }

    /// Recovers a session after a timeout. Every model must be loaded again.
    pub fn reopen(&mut self) -> Result<(), RuntimeError> {
        self.state.diagnostics.clear();
        self.state.context.reopen()
    }

    /// Releases every arena and closes the accelerator.
    pub fn close(self) -> InferenceEngine<Idle> {
        InferenceEngine {
            config: self.config,
            state: Idle {
                accelerator: self.state.context.into_accelerator(),
            },
        }
    }
}

impl<S: EngineState> fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state)
            .field("mode", &self.config.execution_mode)
            .field("profiling", &self.config.enable_profiling)
            .finish()
    }
}

/// File a native dump of `model` is written to inside `dir`.
pub fn dump_file(dir: &Path, model: &str) -> PathBuf {
    let stem: String = model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{stem}.fxnative"))
}
