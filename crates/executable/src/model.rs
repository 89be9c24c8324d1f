// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The compiled, immutable form of a network.
//!
//! An [`ExecutableModel`] addresses a single device arena. The arena holds,
//! in order: parameter regions (weights and biases, whose initial contents
//! are the parameter image), input regions, state regions, and one region
//! per activation or accumulator. Every region starts at an aligned offset.

use model_ir::{EltwiseOp, FixedPwlSegment, Origin, PoolingKind, Rescale};
use serde::{Deserialize, Serialize};
use std::fmt;
use tensor_core::{DType, Shape};

/// What a region of the arena holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Weights,
    Biases,
    Input,
    Activation,
    Accumulator,
    State,
}

impl RegionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weights => "weights",
            Self::Biases => "biases",
            Self::Input => "input",
            Self::Activation => "activation",
            Self::Accumulator => "accumulator",
            Self::State => "state",
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Weights => 0,
            Self::Biases => 1,
            Self::Input => 2,
            Self::Activation => 3,
            Self::Accumulator => 4,
            Self::State => 5,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Weights),
            1 => Some(Self::Biases),
            2 => Some(Self::Input),
            3 => Some(Self::Activation),
            4 => Some(Self::Accumulator),
            5 => Some(Self::State),
            _ => None,
        }
    }

    /// Regions whose contents come from the parameter image.
    pub fn is_parameter(self) -> bool {
        matches!(self, Self::Weights | Self::Biases)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, aligned slice of the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub id: u32,
    pub name: String,
    pub kind: RegionKind,
    /// Byte offset from the start of the arena.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    pub dtype: DType,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// `offset + size`, or `None` when it does not fit in a `u64`.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    pub fn num_elements(&self) -> u64 {
        self.size / self.dtype.size_bytes() as u64
    }
}

/// `len` elements starting `offset` bytes into a region.
///
/// Crops resolve to references with a non-zero offset into their
/// producer's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorRef {
    pub region: u32,
    pub offset: u64,
    pub len: u64,
}

impl TensorRef {
    /// A reference to the whole of a region holding `len` elements.
    pub fn whole(region: u32, len: u64) -> Self {
        Self {
            region,
            offset: 0,
            len,
        }
    }
}

/// One accelerator operation.
///
/// Integer semantics (all arithmetic in i64, results saturated to the
/// output dtype):
/// - `Affine`: `out[r] = b[r] + Σ_c w[r, c] * in[c]`
/// - `Diagonal`: `out[i] = b[i] + w[i] * in[i]`
/// - `Convolution`: 1-D, channel-major input `[in_channels, width]`,
///   output `[num_filters, out_width]`
/// - `Eltwise` sum: `a * m0 + b * m1`; prod: `a * b`
/// - `Pwl`: fixed-point segments, see [`model_ir::quant::eval_pwl`]
/// - `Copy`: element copy, optionally rescaled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Affine {
        input: TensorRef,
        weights: TensorRef,
        biases: Option<TensorRef>,
        output: TensorRef,
        rows: u32,
        cols: u32,
    },
    Diagonal {
        input: TensorRef,
        weights: TensorRef,
        biases: Option<TensorRef>,
        output: TensorRef,
    },
    Convolution {
        input: TensorRef,
        filters: TensorRef,
        biases: Option<TensorRef>,
        output: TensorRef,
        in_channels: u32,
        width: u32,
        num_filters: u32,
        kernel: u32,
        stride: u32,
    },
    Pooling {
        input: TensorRef,
        output: TensorRef,
        kind: PoolingKind,
        channels: u32,
        width: u32,
        window: u32,
        stride: u32,
    },
    Eltwise {
        op: EltwiseOp,
        a: TensorRef,
        b: TensorRef,
        output: TensorRef,
        multipliers: Vec<i32>,
    },
    Pwl {
        input: TensorRef,
        output: TensorRef,
        segments: Vec<FixedPwlSegment>,
    },
    Copy {
        input: TensorRef,
        output: TensorRef,
        rescale: Option<Rescale>,
    },
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Affine { .. } => "affine",
            Self::Diagonal { .. } => "diagonal",
            Self::Convolution { .. } => "convolution",
            Self::Pooling { .. } => "pooling",
            Self::Eltwise { .. } => "eltwise",
            Self::Pwl { .. } => "pwl",
            Self::Copy { .. } => "copy",
        }
    }

    /// Every tensor the operation reads, parameters included.
    pub fn reads(&self) -> Vec<TensorRef> {
        match self {
            Self::Affine {
                input,
                weights,
                biases,
                ..
            }
            | Self::Diagonal {
                input,
                weights,
                biases,
                ..
            } => {
                let mut v = vec![*input, *weights];
                v.extend(biases);
                v
            }
            Self::Convolution {
                input,
                filters,
                biases,
                ..
            } => {
                let mut v = vec![*input, *filters];
                v.extend(biases);
                v
            }
            Self::Eltwise { a, b, .. } => vec![*a, *b],
            Self::Pooling { input, .. } | Self::Pwl { input, .. } | Self::Copy { input, .. } => {
                vec![*input]
            }
        }
    }

    pub fn output(&self) -> TensorRef {
        match self {
            Self::Affine { output, .. }
            | Self::Diagonal { output, .. }
            | Self::Convolution { output, .. }
            | Self::Pooling { output, .. }
            | Self::Eltwise { output, .. }
            | Self::Pwl { output, .. }
            | Self::Copy { output, .. } => *output,
        }
    }
}

/// An operation tagged with the layer it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub layer: String,
    pub origin: Origin,
    pub op: Operation,
}

/// A network input or output as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub scale: f64,
    pub tensor: TensorRef,
}

/// A persistent state buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDescriptor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub scale: f64,
    pub region: u32,
}

/// Output scale and type of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEntry {
    pub layer: String,
    pub scale: f64,
    pub dtype: DType,
}

/// A compiled network. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableModel {
    pub name: String,
    pub regions: Vec<MemoryRegion>,
    /// Bytes of device memory the model needs, a multiple of the
    /// allocation granularity.
    pub arena_size: u64,
    /// Initial contents of arena bytes `0..parameters.len()`.
    pub parameters: Vec<u8>,
    pub instructions: Vec<Instruction>,
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
    pub states: Vec<StateDescriptor>,
    pub scales: Vec<ScaleEntry>,
}

impl ExecutableModel {
    pub fn region(&self, id: u32) -> Option<&MemoryRegion> {
        self.regions.get(id as usize).filter(|r| r.id == id)
    }

    pub fn input(&self, name: &str) -> Option<&TensorDescriptor> {
        self.inputs.iter().find(|d| d.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.outputs.iter().find(|d| d.name == name)
    }

    pub fn scale_of(&self, layer: &str) -> Option<f64> {
        self.scales.iter().find(|s| s.layer == layer).map(|s| s.scale)
    }

    /// Total bytes of weights and biases.
    pub fn parameter_bytes(&self) -> u64 {
        self.regions
            .iter()
            .filter(|r| r.kind.is_parameter())
            .map(|r| r.size)
            .sum()
    }

    /// Byte span `[start, end)` of a tensor inside the arena.
    pub fn byte_span(&self, tensor: &TensorRef) -> Option<(u64, u64)> {
        let region = self.region(tensor.region)?;
        let start = region.offset.checked_add(tensor.offset)?;
        let end = start.checked_add(tensor.len.checked_mul(region.dtype.size_bytes() as u64)?)?;
        Some((start, end))
    }

    /// Checks that every region lies inside the arena, that regions do not
    /// overlap, and that every tensor reference lies inside its region.
    pub fn check_layout(&self) -> Result<(), String> {
        let mut prev_end = 0u64;
        for (i, r) in self.regions.iter().enumerate() {
            if r.id as usize != i {
                return Err(format!("region '{}' has id {} at index {}", r.name, r.id, i));
            }
            if r.offset < prev_end {
                return Err(format!("region '{}' overlaps its predecessor", r.name));
            }
            let end = r
                .checked_end()
                .ok_or_else(|| format!("region '{}' size overflows", r.name))?;
            if end > self.arena_size {
                return Err(format!(
                    "region '{}' ends at {} beyond arena of {} bytes",
                    r.name, end, self.arena_size
                ));
            }
            prev_end = end;
        }
        if self.parameters.len() as u64 > self.arena_size {
            return Err("parameter image larger than arena".into());
        }

        let check = |t: &TensorRef, what: &str| -> Result<(), String> {
            let region = self
                .region(t.region)
                .ok_or_else(|| format!("{what} references missing region {}", t.region))?;
            let end = t
                .len
                .checked_mul(region.dtype.size_bytes() as u64)
                .and_then(|bytes| bytes.checked_add(t.offset))
                .ok_or_else(|| format!("{what} tensor extent overflows"))?;
            if end > region.size {
                return Err(format!("{what} exceeds region '{}'", region.name));
            }
            Ok(())
        };
        for inst in &self.instructions {
            for t in inst.op.reads() {
                check(&t, &inst.layer)?;
            }
            check(&inst.op.output(), &inst.layer)?;
        }
        for d in self.inputs.iter().chain(&self.outputs) {
            check(&d.tensor, &d.name)?;
        }
        for s in &self.states {
            if self.region(s.region).map(|r| r.kind) != Some(RegionKind::State) {
                return Err(format!("state '{}' does not reference a state region", s.name));
            }
        }
        Ok(())
    }

    /// Returns a summary string describing the model.
    pub fn summary(&self) -> String {
        format!(
            "Model '{}': {} instructions, {} regions, arena {} bytes ({} parameter bytes), {} inputs, {} outputs, {} states",
            self.name,
            self.instructions.len(),
            self.regions.len(),
            self.arena_size,
            self.parameter_bytes(),
            self.inputs.len(),
            self.outputs.len(),
            self.states.len(),
        )
    }
}

impl fmt::Display for ExecutableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for r in &self.regions {
            writeln!(
                f,
                "  region {:>3} {:<12} {:>8} +{:<8} {:<4} {}",
                r.id, r.kind, r.offset, r.size, r.dtype, r.name
            )?;
        }
        for (i, inst) in self.instructions.iter().enumerate() {
            writeln!(f, "  [{i:>3}] {:<12} {} ({})", inst.op.as_str(), inst.layer, inst.origin)?;
        }
        Ok(())
    }
}
