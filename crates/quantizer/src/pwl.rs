// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversion of real-domain PWL segments to the device encoding.

use model_ir::quant::{eval_pwl, split_ratio};
use model_ir::{ActivationFn, FixedPwlSegment, PwlSegment};
use tensor_core::fixed::{round_half_away, saturate};
use tensor_core::DType;

/// Points sampled when measuring the fixed-point approximation error.
const ERROR_SAMPLES: usize = 1024;

/// Slack when deciding which integer input is the first inside a segment.
const BASE_EPSILON: f64 = 1e-9;

/// Converts sorted real segments to fixed point for an input scale `s_in`
/// and output scale `s_out`.
///
/// Each segment is based at the first integer input inside it. An interior
/// segment containing no integer input is dropped. The first segment also
/// covers every input to its left, so it is never dropped: on a collision
/// it moves one step below its successor. The result is strictly
/// increasing in `x_base`.
pub fn to_fixed(segments: &[PwlSegment], s_in: f64, s_out: f64, out: DType) -> Vec<FixedPwlSegment> {
    let mut bases: Vec<i64> = segments.iter().map(|seg| first_input(seg.x_start, s_in)).collect();
    if let [first, second, ..] = bases.as_mut_slice() {
        *first = (*first).min(second.saturating_sub(1));
    }

    let mut fixed: Vec<FixedPwlSegment> = Vec::with_capacity(segments.len());
    for (i, (seg, &x_base)) in segments.iter().zip(&bases).enumerate() {
        let entry = anchor(seg, x_base, s_in, s_out, out);
        match fixed.last_mut() {
            Some(prev) if i > 1 && prev.x_base >= entry.x_base => *prev = entry,
            _ => fixed.push(entry),
        }
    }
    fixed
}

fn first_input(x_start: f64, s_in: f64) -> i64 {
    let q = x_start / s_in;
    let nearest = round_half_away(q);
    let base = if (q - nearest as f64).abs() <= BASE_EPSILON {
        nearest
    } else {
        q.ceil() as i64
    };
    base.clamp(i32::MIN as i64 + 1, i32::MAX as i64)
}

/// Re-anchors a real segment at the integer input `x_base`.
fn anchor(seg: &PwlSegment, x_base: i64, s_in: f64, s_out: f64, out: DType) -> FixedPwlSegment {
    let y_at_base = seg.y_start + seg.slope * (x_base as f64 * s_in - seg.x_start);
    let y_base = saturate(round_half_away(y_at_base / s_out), out);
    let (slope, shift) = split_ratio(seg.slope * s_in / s_out);
    FixedPwlSegment {
        x_base: x_base as i32,
        y_base: y_base.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
        slope,
        shift,
    }
}

/// Largest `|f(x) - pwl(x)|` over `[lo, hi]`, evaluating the fixed-point
/// segments exactly as the device does.
pub fn fixed_error(
    function: &ActivationFn,
    fixed: &[FixedPwlSegment],
    s_in: f64,
    s_out: f64,
    out: DType,
    lo: f64,
    hi: f64,
) -> f64 {
    if fixed.is_empty() || !(hi > lo) {
        return 0.0;
    }
    let step = (hi - lo) / ERROR_SAMPLES as f64;
    (0..=ERROR_SAMPLES)
        .map(|i| {
            let x = lo + step * i as f64;
            let q = round_half_away(x / s_in);
            let y = eval_pwl(fixed, q, out) as f64 * s_out;
            // Compare against the function at the quantized input, which
            // is what the device actually sees.
            (function.eval(q as f64 * s_in) - y).abs()
        })
        .fold(0.0, f64::max)
}

/// Largest `|y|` the real segments produce on `[-range, range]`.
pub fn output_range(segments: &[PwlSegment], range: f64) -> f64 {
    let mut points = vec![-range, range];
    points.extend(
        segments
            .iter()
            .map(|s| s.x_start)
            .filter(|x| x.abs() <= range),
    );
    points
        .into_iter()
        .map(|x| PwlSegment::eval_list(segments, x).abs())
        .fold(0.0, f64::max)
}
