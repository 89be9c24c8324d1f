// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer definitions for the accelerator graph IR.
//!
//! Every layer is one variant of the closed [`LayerKind`] enum. Passes and
//! the model builder match on it exhaustively, so adding a kind forces every
//! stage to decide what to do with it.

use crate::quant::LayerQuant;
use serde::{Deserialize, Serialize};
use std::fmt;
use tensor_core::{ops, DType, Shape};

// ── Identifiers ────────────────────────────────────────────────────

/// Stable identifier of a layer inside one graph.
///
/// Ids are never reused, so they stay valid while passes insert layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a named recurrent state buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub u32);

// ── Parameter blobs ────────────────────────────────────────────────

/// A floating-point parameter tensor owned by a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub shape: Shape,
    pub values: Vec<f32>,
}

impl Blob {
    pub fn new(shape: Shape, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// A rank-1 blob.
    pub fn vector(values: Vec<f32>) -> Self {
        Self {
            shape: Shape::vector(values.len()),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest absolute value in the blob (0 for an empty blob).
    pub fn max_abs(&self) -> f32 {
        self.values.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }
}

// ── Layer kinds ────────────────────────────────────────────────────

/// Non-linear (or identity) activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum ActivationFn {
    Identity,
    Relu,
    LeakyRelu { negative_slope: f32 },
    Sigmoid,
    Tanh,
}

impl ActivationFn {
    /// Evaluates the function in double precision.
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Relu => ops::relu(x),
            Self::LeakyRelu { negative_slope } => ops::leaky_relu(x, *negative_slope as f64),
            Self::Sigmoid => ops::sigmoid(x),
            Self::Tanh => ops::tanh(x),
        }
    }

    /// Saturating functions have a bounded output range.
    pub fn output_bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Sigmoid => Some((0.0, 1.0)),
            Self::Tanh => Some((-1.0, 1.0)),
            _ => None,
        }
    }

    /// Whether the function is already piecewise linear, in which case its
    /// segments are exact.
    pub fn is_piecewise_linear(&self) -> bool {
        matches!(self, Self::Identity | Self::Relu | Self::LeakyRelu { .. })
    }

    /// Parses an activation name as it appears in manifests.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity" | "linear" | "none" => Some(Self::Identity),
            "relu" => Some(Self::Relu),
            "leaky_relu" | "leakyrelu" => Some(Self::LeakyRelu {
                negative_slope: 0.01,
            }),
            "sigmoid" | "logistic" => Some(Self::Sigmoid),
            "tanh" => Some(Self::Tanh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Relu => "relu",
            Self::LeakyRelu { .. } => "leaky_relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        }
    }
}

impl fmt::Display for ActivationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingKind {
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EltwiseOp {
    Sum,
    Prod,
}

/// One linear piece of a real-domain PWL approximation.
///
/// The segment covers `[x_start, next.x_start)` and evaluates to
/// `y_start + slope * (x - x_start)`. The first segment of a list also
/// covers everything left of its start and the last one everything right of
/// its end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PwlSegment {
    pub x_start: f64,
    pub y_start: f64,
    pub slope: f64,
}

impl PwlSegment {
    /// Evaluates a sorted segment list at `x`.
    pub fn eval_list(segments: &[PwlSegment], x: f64) -> f64 {
        let idx = segments
            .iter()
            .rposition(|s| s.x_start <= x)
            .unwrap_or(0);
        match segments.get(idx) {
            Some(s) => s.y_start + s.slope * (x - s.x_start),
            None => 0.0,
        }
    }
}

/// The computation a layer performs.
///
/// The first group of variants comes from source graphs. `Diagonal`, `Pwl`
/// and `Copy` only ever appear after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    /// Graph input; its output shape is the input tensor shape.
    Input,
    /// Fully connected layer. `weights` is `[outputs, inputs]`.
    Affine {
        weights: Blob,
        biases: Option<Blob>,
    },
    /// 1-D convolution over `[1, in_channels, width]` inputs.
    /// `filters` is `[num_filters, in_channels, kernel]`.
    Convolution {
        filters: Blob,
        biases: Option<Blob>,
        in_channels: usize,
        kernel: usize,
        stride: usize,
    },
    Pooling {
        kind: PoolingKind,
        window: usize,
        stride: usize,
        channels: usize,
    },
    Activation {
        function: ActivationFn,
    },
    /// Per-element `x * scale + shift`.
    ScaleShift {
        scale: Blob,
        shift: Option<Blob>,
    },
    Eltwise {
        op: EltwiseOp,
    },
    /// Contiguous sub-range of the input, element offsets.
    Crop {
        offset: usize,
        len: usize,
    },
    /// Reads the value stored into `state` by the previous inference.
    MemoryRead {
        state: StateId,
    },
    /// Stores its input into `state` for the next inference.
    MemoryWrite {
        state: StateId,
    },
    /// Element-wise affine expressed as a diagonal weight matrix.
    Diagonal {
        weights: Blob,
        biases: Option<Blob>,
    },
    /// Piecewise-linear activation. `function` is kept for diagnostics.
    Pwl {
        function: ActivationFn,
        segments: Vec<PwlSegment>,
    },
    Copy,
}

impl LayerKind {
    /// Short label used in summaries and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Affine { .. } => "affine",
            Self::Convolution { .. } => "convolution",
            Self::Pooling { .. } => "pooling",
            Self::Activation { .. } => "activation",
            Self::ScaleShift { .. } => "scale_shift",
            Self::Eltwise { .. } => "eltwise",
            Self::Crop { .. } => "crop",
            Self::MemoryRead { .. } => "memory_read",
            Self::MemoryWrite { .. } => "memory_write",
            Self::Diagonal { .. } => "diagonal",
            Self::Pwl { .. } => "pwl",
            Self::Copy => "copy",
        }
    }

    /// Number of producer edges this kind requires.
    pub fn arity(&self) -> usize {
        match self {
            Self::Input | Self::MemoryRead { .. } => 0,
            Self::Eltwise { .. } => 2,
            _ => 1,
        }
    }

    /// Layers whose output is a 32-bit accumulator rather than a narrow
    /// activation.
    pub fn produces_accumulator(&self) -> bool {
        matches!(
            self,
            Self::Affine { .. }
                | Self::Diagonal { .. }
                | Self::Convolution { .. }
                | Self::Eltwise { .. }
        )
    }

    /// Layers that may consume an accumulator directly.
    pub fn accepts_accumulator(&self) -> bool {
        matches!(self, Self::Pwl { .. } | Self::Activation { .. })
    }

    /// Kinds that only exist in untransformed graphs.
    pub fn is_source_only(&self) -> bool {
        matches!(self, Self::Activation { .. } | Self::ScaleShift { .. })
    }

    /// Total number of float parameters owned by the layer.
    pub fn num_parameters(&self) -> usize {
        let opt = |b: &Option<Blob>| b.as_ref().map_or(0, Blob::len);
        match self {
            Self::Affine { weights, biases } | Self::Diagonal { weights, biases } => {
                weights.len() + opt(biases)
            }
            Self::Convolution {
                filters, biases, ..
            } => filters.len() + opt(biases),
            Self::ScaleShift { scale, shift } => scale.len() + opt(shift),
            _ => 0,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Origin ─────────────────────────────────────────────────────────

/// Why a synthetic layer was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticKind {
    Pwl,
    IdentityPwl,
    Diagonal,
    AlignmentCopy,
    RescaleCopy,
}

impl SyntheticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pwl => "pwl",
            Self::IdentityPwl => "identity_pwl",
            Self::Diagonal => "diagonal",
            Self::AlignmentCopy => "alignment_copy",
            Self::RescaleCopy => "rescale_copy",
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Pwl => 1,
            Self::IdentityPwl => 2,
            Self::Diagonal => 3,
            Self::AlignmentCopy => 4,
            Self::RescaleCopy => 5,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Pwl),
            2 => Some(Self::IdentityPwl),
            3 => Some(Self::Diagonal),
            4 => Some(Self::AlignmentCopy),
            5 => Some(Self::RescaleCopy),
            _ => None,
        }
    }
}

/// Whether a layer came from the source graph or was inserted by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Source,
    Synthetic(SyntheticKind),
}

impl Origin {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }

    /// 0 for source layers, otherwise the synthetic kind's tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Source => 0,
            Self::Synthetic(kind) => kind.tag(),
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        if tag == 0 {
            Some(Self::Source)
        } else {
            SyntheticKind::from_tag(tag).map(Self::Synthetic)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Synthetic(kind) => write!(f, "synthetic:{}", kind.as_str()),
        }
    }
}

// ── Layer ──────────────────────────────────────────────────────────

/// A single node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    /// Unique name (e.g., `"fc1"` or `"fc1/identity"` for synthetic layers).
    pub name: String,
    pub kind: LayerKind,
    /// Producer layers, in operand order.
    pub inputs: Vec<LayerId>,
    pub output_shape: Shape,
    pub origin: Origin,
    /// Fixed-point parameters, present once the quantizer has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant: Option<LayerQuant>,
}

impl Layer {
    pub fn is_synthetic(&self) -> bool {
        self.origin.is_synthetic()
    }

    /// Returns a one-line summary of this layer.
    pub fn summary(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(|i| i.to_string()).collect();
        format!(
            "{} {:<24} {:<12} out={} in=[{}]{}",
            self.id,
            self.name,
            self.kind.as_str(),
            self.output_shape,
            inputs.join(", "),
            if self.is_synthetic() {
                format!(" ({})", self.origin)
            } else {
                String::new()
            }
        )
    }
}

/// Output element type a layer produces on the device.
///
/// Accumulator producers write 32-bit values; everything else writes the
/// activation precision.
pub fn output_dtype(kind: &LayerKind, activation: DType) -> DType {
    if kind.produces_accumulator() {
        DType::I32
    } else {
        activation
    }
}
