// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph loading from manifest + SafeTensors files.
//!
//! The loader reads a model directory containing:
//! - `model.json` — the layer manifest (see [`GraphManifest`]).
//! - `model.safetensors` — float parameters in HuggingFace SafeTensors format.
//!
//! The SafeTensors file is memory-mapped; only the tensors a layer
//! references are copied out, into the layer's parameter blobs.

use crate::builder::GraphBuilder;
use crate::graph::{Graph, Validated};
use crate::manifest::{GraphManifest, ManifestLayer, ManifestOp};
use crate::{LayerId, ModelError, StateId};
use std::collections::HashMap;
use std::path::Path;
use tensor_core::Shape;

/// Default manifest filename.
const MANIFEST_FILE: &str = "model.json";

/// Default SafeTensors filename.
const WEIGHTS_FILE: &str = "model.safetensors";

/// Anything that can hand out float parameter tensors by name.
pub trait WeightSource {
    fn tensor(&self, name: &str) -> Result<Vec<f32>, ModelError>;
}

impl WeightSource for HashMap<String, Vec<f32>> {
    fn tensor(&self, name: &str) -> Result<Vec<f32>, ModelError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ModelError::MissingParameter { name: name.into() })
    }
}

/// A memory-mapped SafeTensors file.
pub struct SafeTensorsFile {
    mmap: memmap2::Mmap,
}

impl SafeTensorsFile {
    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path).map_err(|e| ModelError::io(path, e))?;
        // SAFETY: the mapping is read-only and the file is not modified
        // while the graph is being loaded.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| ModelError::io(path, e))?;

        // Parse once up front so a corrupt file fails here, not per tensor.
        safetensors::SafeTensors::deserialize(&mmap)
            .map_err(|e| ModelError::Parameters(format!("SafeTensors parse error: {e}")))?;
        Ok(Self { mmap })
    }
}

impl WeightSource for SafeTensorsFile {
    fn tensor(&self, name: &str) -> Result<Vec<f32>, ModelError> {
        let tensors = safetensors::SafeTensors::deserialize(&self.mmap)
            .map_err(|e| ModelError::Parameters(format!("SafeTensors parse error: {e}")))?;
        let view = tensors
            .tensor(name)
            .map_err(|_| ModelError::MissingParameter { name: name.into() })?;
        match view.dtype() {
            safetensors::Dtype::F32 => Ok(view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()),
            other => Err(ModelError::Parameters(format!(
                "tensor '{name}' has unsupported dtype {other:?}, expected F32"
            ))),
        }
    }
}

/// Loads a network from disk into a validated [`Graph`].
///
/// # Example
/// ```no_run
/// use model_ir::GraphLoader;
/// use std::path::Path;
///
/// let graph = GraphLoader::load(Path::new("./models/kws")).unwrap();
/// println!("{}", graph.summary());
/// ```
pub struct GraphLoader;

impl GraphLoader {
    /// Loads and validates the network in `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Graph<Validated>, ModelError> {
        let manifest = GraphManifest::from_file(&model_dir.join(MANIFEST_FILE))?;
        let weights = SafeTensorsFile::open(&model_dir.join(WEIGHTS_FILE))?;
        let graph = Self::from_manifest(&manifest, &weights)?;
        tracing::info!("loaded {}", graph.summary());
        Ok(graph)
    }

    /// Builds a graph from a parsed manifest and any weight source.
    pub fn from_manifest(
        manifest: &GraphManifest,
        weights: &dyn WeightSource,
    ) -> Result<Graph<Validated>, ModelError> {
        manifest.validate()?;

        let mut b = GraphBuilder::new(manifest.name.clone());
        let mut states: HashMap<&str, StateId> = HashMap::new();
        for s in &manifest.states {
            states.insert(&s.name, b.state(s.name.clone(), Shape::new(s.shape.clone())));
        }

        let mut ids: HashMap<&str, LayerId> = HashMap::new();
        for ml in &manifest.layers {
            let id = Self::add_layer(&mut b, ml, &ids, &states, weights)?;
            ids.insert(&ml.name, id);
        }
        for out in &manifest.outputs {
            if let Some(id) = ids.get(out.as_str()) {
                b.output(*id);
            }
        }
        b.finish()
    }

    fn add_layer(
        b: &mut GraphBuilder,
        ml: &ManifestLayer,
        ids: &HashMap<&str, LayerId>,
        states: &HashMap<&str, StateId>,
        weights: &dyn WeightSource,
    ) -> Result<LayerId, ModelError> {
        let missing = |field: &str| ModelError::InvalidLayer {
            layer: ml.name.clone(),
            detail: format!("missing '{field}'"),
        };
        let input = |i: usize| -> Result<LayerId, ModelError> {
            ml.inputs
                .get(i)
                .and_then(|n| ids.get(n.as_str()).copied())
                .ok_or_else(|| missing("inputs"))
        };
        let tensor = |name: &Option<String>| -> Result<Option<Vec<f32>>, ModelError> {
            name.as_deref().map(|n| weights.tensor(n)).transpose()
        };
        let state = || -> Result<StateId, ModelError> {
            ml.state
                .as_deref()
                .and_then(|s| states.get(s).copied())
                .ok_or_else(|| missing("state"))
        };

        let op = ManifestOp::from_str_loose(&ml.layer_type).ok_or_else(|| {
            ModelError::InvalidLayer {
                layer: ml.name.clone(),
                detail: format!("unrecognised layer type '{}'", ml.layer_type),
            }
        })?;

        let id = match op {
            ManifestOp::Input => {
                let shape = ml.shape.clone().ok_or_else(|| missing("shape"))?;
                b.input(ml.name.clone(), Shape::new(shape))
            }
            ManifestOp::Affine => {
                let w = tensor(&ml.weights)?.ok_or_else(|| missing("weights"))?;
                let outputs = ml.outputs.ok_or_else(|| missing("outputs"))?;
                b.affine(ml.name.clone(), input(0)?, outputs, w, tensor(&ml.biases)?)
            }
            ManifestOp::Convolution => {
                let w = tensor(&ml.weights)?.ok_or_else(|| missing("weights"))?;
                let filters = ml.outputs.ok_or_else(|| missing("outputs"))?;
                let kernel = ml.kernel.ok_or_else(|| missing("kernel"))?;
                b.convolution(
                    ml.name.clone(),
                    input(0)?,
                    filters,
                    kernel,
                    ml.stride.unwrap_or(1),
                    w,
                    tensor(&ml.biases)?,
                )
            }
            ManifestOp::Pooling(kind) => {
                let window = ml.window.ok_or_else(|| missing("window"))?;
                b.pooling(
                    ml.name.clone(),
                    input(0)?,
                    kind,
                    window,
                    ml.stride.unwrap_or(window),
                )
            }
            ManifestOp::Activation(mut function) => {
                if let (
                    crate::ActivationFn::LeakyRelu { negative_slope },
                    Some(slope),
                ) = (&mut function, ml.negative_slope)
                {
                    *negative_slope = slope;
                }
                b.activation(ml.name.clone(), input(0)?, function)
            }
            ManifestOp::ScaleShift => {
                let scale = tensor(&ml.weights)?.ok_or_else(|| missing("weights"))?;
                b.scale_shift(ml.name.clone(), input(0)?, scale, tensor(&ml.biases)?)
            }
            ManifestOp::Eltwise(op) => b.eltwise(ml.name.clone(), op, input(0)?, input(1)?),
            ManifestOp::Crop => {
                let len = ml.len.ok_or_else(|| missing("len"))?;
                b.crop(ml.name.clone(), input(0)?, ml.offset.unwrap_or(0), len)
            }
            ManifestOp::MemoryRead => b.memory_read(ml.name.clone(), state()?),
            ManifestOp::MemoryWrite => b.memory_write(ml.name.clone(), input(0)?, state()?),
        };
        Ok(id)
    }
}
