// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON network manifest parsing.
//!
//! The manifest (`model.json`) lists layers in execution order and maps
//! their parameters to tensor names in the SafeTensors file.
//!
//! # Format
//! ```json
//! {
//!   "name": "kws",
//!   "states": [{ "name": "h", "shape": [1, 8] }],
//!   "layers": [
//!     { "name": "in",  "type": "input", "shape": [1, 10] },
//!     { "name": "fc1", "type": "affine", "inputs": ["in"], "outputs": 8,
//!       "weights": "fc1.weight", "biases": "fc1.bias" },
//!     { "name": "act", "type": "sigmoid", "inputs": ["fc1"] }
//!   ],
//!   "outputs": ["act"]
//! }
//! ```

use crate::{ActivationFn, EltwiseOp, ModelError, PoolingKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level manifest, deserialized from `model.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphManifest {
    pub name: String,
    #[serde(default)]
    pub states: Vec<ManifestState>,
    pub layers: Vec<ManifestLayer>,
    /// Names of the layers whose results are returned to the caller.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestState {
    pub name: String,
    pub shape: Vec<usize>,
}

/// A single layer entry. Which optional fields are required depends on
/// `layer_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Input tensor shape (`input` layers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Output features (`affine`) or filter count (`convolution`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<usize>,
    /// Tensor name of the weights, filters or per-element scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    /// Tensor name of the biases or per-element shift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biases: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    /// State name (`memory_read` / `memory_write`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_slope: Option<f32>,
}

/// Manifest layer types after alias resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManifestOp {
    Input,
    Affine,
    Convolution,
    Pooling(PoolingKind),
    Activation(ActivationFn),
    ScaleShift,
    Eltwise(EltwiseOp),
    Crop,
    MemoryRead,
    MemoryWrite,
}

impl ManifestOp {
    /// Parses a layer type string.
    ///
    /// Activation functions may be given directly (`"sigmoid"`) as well as
    /// through common aliases (`"fc"`, `"conv1d"`, `"add"`, `"slice"`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let op = match s.to_lowercase().as_str() {
            "input" => Self::Input,
            "affine" | "fc" | "fully_connected" | "dense" => Self::Affine,
            "convolution" | "conv" | "conv1d" => Self::Convolution,
            "max_pool" | "maxpool" | "pooling" => Self::Pooling(PoolingKind::Max),
            "avg_pool" | "avgpool" => Self::Pooling(PoolingKind::Avg),
            "scale_shift" | "scaleshift" | "power" => Self::ScaleShift,
            "sum" | "add" | "eltwise_sum" => Self::Eltwise(EltwiseOp::Sum),
            "prod" | "mul" | "eltwise_prod" => Self::Eltwise(EltwiseOp::Prod),
            "crop" | "slice" => Self::Crop,
            "memory_read" | "read_value" => Self::MemoryRead,
            "memory_write" | "assign" => Self::MemoryWrite,
            other => Self::Activation(ActivationFn::from_str_loose(other)?),
        };
        Some(op)
    }
}

impl GraphManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ModelError::io(path, e))?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Checks that the manifest is internally consistent.
    ///
    /// - At least one layer is defined.
    /// - All layer type strings are recognised.
    /// - Layer and state names are unique.
    /// - Every referenced input and state name exists.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::Topology("manifest contains no layers".into()));
        }

        let mut states = HashSet::new();
        for state in &self.states {
            if !states.insert(state.name.as_str()) {
                return Err(ModelError::State {
                    state: state.name.clone(),
                    detail: "declared twice".into(),
                });
            }
        }

        let mut seen = HashSet::new();
        for layer in &self.layers {
            if ManifestOp::from_str_loose(&layer.layer_type).is_none() {
                return Err(ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: format!("unrecognised layer type '{}'", layer.layer_type),
                });
            }
            for input in &layer.inputs {
                if !seen.contains(input.as_str()) {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: format!("unknown input '{input}'"),
                    });
                }
            }
            if let Some(state) = &layer.state {
                if !states.contains(state.as_str()) {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: format!("unknown state '{state}'"),
                    });
                }
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: "duplicate layer name".into(),
                });
            }
        }

        for output in &self.outputs {
            if !seen.contains(output.as_str()) {
                return Err(ModelError::Topology(format!(
                    "unknown output layer '{output}'"
                )));
            }
        }
        Ok(())
    }
}
