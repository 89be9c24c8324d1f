// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-point parameter types attached to layers by the quantizer.
//!
//! The evaluation helpers here ([`eval_pwl`], [`Rescale::apply`]) are the
//! reference semantics for the device: the simulated accelerator calls the
//! same functions, so compile-time error estimates and run-time results use
//! identical arithmetic.

use serde::{Deserialize, Serialize};
use tensor_core::fixed::{decode_ints, rounding_shift_right, saturate};
use tensor_core::DType;

/// Largest magnitude of a 16-bit multiplier mantissa.
pub const MANTISSA_MAX: i64 = i16::MAX as i64;

/// Largest right shift the device applies after a multiplication.
pub const MAX_SHIFT: u8 = 48;

/// A parameter blob converted to fixed point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedBlob {
    pub dtype: DType,
    /// Real value of one integer step.
    pub scale: f64,
    /// Precision actually used (may be narrower than `dtype`).
    pub bits: u8,
    /// Little-endian integers, `len * dtype.size_bytes()` bytes.
    pub data: Vec<u8>,
    pub len: usize,
    /// Largest `|dequantized - original|` over non-saturated values.
    pub max_abs_error: f64,
    /// Number of values clipped to the representable range.
    pub saturated: usize,
}

impl QuantizedBlob {
    pub fn values(&self) -> Vec<i64> {
        decode_ints(&self.data, self.dtype)
    }

    pub fn dequantize(&self) -> Vec<f64> {
        self.values()
            .into_iter()
            .map(|q| q as f64 * self.scale)
            .collect()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// A PWL segment in the device's fixed-point encoding.
///
/// For inputs `x >= x_base` (up to the next segment) the output is
/// `y_base + rounding_shift_right((x - x_base) * slope, shift)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPwlSegment {
    pub x_base: i32,
    pub y_base: i16,
    pub slope: i16,
    pub shift: u8,
}

/// Evaluates fixed-point PWL segments at integer input `x`.
///
/// Inputs left of the first segment use the first segment. The result is
/// saturated to `out`.
pub fn eval_pwl(segments: &[FixedPwlSegment], x: i64, out: DType) -> i64 {
    let seg = segments
        .iter()
        .rev()
        .find(|s| s.x_base as i64 <= x)
        .or_else(|| segments.first());
    match seg {
        Some(s) => {
            let delta = (x - s.x_base as i64) * s.slope as i64;
            saturate(s.y_base as i64 + rounding_shift_right(delta, s.shift), out)
        }
        None => 0,
    }
}

/// Splits a non-negative real ratio into a 16-bit mantissa and a right shift.
///
/// Returns the most precise encoding whose mantissa fits in 16 bits. Ratios
/// too large for a zero shift saturate the mantissa.
pub fn split_ratio(ratio: f64) -> (i16, u8) {
    if ratio == 0.0 || !ratio.is_finite() {
        return (0, 0);
    }
    let mag = ratio.abs();
    let mut shift = 0u8;
    while shift < MAX_SHIFT && (mag * 2f64.powi(shift as i32 + 1)).round() <= MANTISSA_MAX as f64 {
        shift += 1;
    }
    let m = (mag * 2f64.powi(shift as i32)).round().min(MANTISSA_MAX as f64) as i16;
    if ratio < 0.0 {
        (-m, shift)
    } else {
        (m, shift)
    }
}

/// Integer rescale `x * multiplier >> shift` used by rescale copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rescale {
    pub multiplier: i32,
    pub shift: u8,
}

impl Rescale {
    /// Rescale from a source scale to a destination scale.
    pub fn between(src_scale: f64, dst_scale: f64) -> Self {
        let (m, shift) = split_ratio(src_scale / dst_scale);
        Self {
            multiplier: m as i32,
            shift,
        }
    }

    /// The real ratio the integer encoding represents.
    pub fn ratio(&self) -> f64 {
        self.multiplier as f64 / 2f64.powi(self.shift as i32)
    }

    pub fn apply(&self, x: i64, out: DType) -> i64 {
        saturate(rounding_shift_right(x * self.multiplier as i64, self.shift), out)
    }
}

/// Everything the builder needs to emit a layer in fixed point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerQuant {
    /// Real value of one integer step of the layer's output.
    pub output_scale: f64,
    pub output_dtype: DType,
    #[serde(default)]
    pub weights: Option<QuantizedBlob>,
    #[serde(default)]
    pub biases: Option<QuantizedBlob>,
    #[serde(default)]
    pub pwl: Vec<FixedPwlSegment>,
    /// Per-operand integer multipliers of an eltwise sum.
    #[serde(default)]
    pub input_multipliers: Vec<i32>,
    #[serde(default)]
    pub rescale: Option<Rescale>,
}

impl LayerQuant {
    /// Quantization for layers without parameters.
    pub fn activation(output_scale: f64, output_dtype: DType) -> Self {
        Self {
            output_scale,
            output_dtype,
            weights: None,
            biases: None,
            pwl: Vec::new(),
            input_multipliers: Vec::new(),
            rescale: None,
        }
    }

    pub fn parameter_bytes(&self) -> usize {
        self.weights.as_ref().map_or(0, QuantizedBlob::size_bytes)
            + self.biases.as_ref().map_or(0, QuantizedBlob::size_bytes)
    }
}
