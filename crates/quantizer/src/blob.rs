// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter blob quantization.

use crate::config::qmax;
use model_ir::QuantizedBlob;
use tensor_core::fixed::{self, encode_ints};
use tensor_core::DType;

/// The `percentile`-th percentile of `|values|` (100 gives the maximum).
pub fn abs_percentile(values: &[f32], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut mags: Vec<f64> = values.iter().map(|v| (*v as f64).abs()).collect();
    mags.sort_by(|a, b| a.total_cmp(b));
    let rank = (percentile / 100.0 * mags.len() as f64).ceil() as usize;
    mags[rank.clamp(1, mags.len()) - 1]
}

/// Quantizes with the smallest scale that maps the clip value onto the
/// largest integer of `bits`.
pub fn quantize_blob(values: &[f32], bits: u8, saturation_percentile: f64) -> QuantizedBlob {
    let clip = abs_percentile(values, saturation_percentile);
    let scale = if clip > 0.0 { clip / qmax(bits) } else { 1.0 };
    quantize_with_scale(values, scale, bits)
}

/// Quantizes with a fixed scale, saturating at `bits`.
pub fn quantize_with_scale(values: &[f32], scale: f64, bits: u8) -> QuantizedBlob {
    let dtype = DType::for_bits(bits).unwrap_or(DType::I32);
    let mut ints = Vec::with_capacity(values.len());
    let mut max_abs_error = 0.0f64;
    let mut saturated = 0;

    for &v in values {
        let (q, sat) = fixed::quantize(v as f64, scale, dtype);
        if sat {
            saturated += 1;
        } else {
            max_abs_error = max_abs_error.max((q as f64 * scale - v as f64).abs());
        }
        ints.push(q);
    }

    QuantizedBlob {
        dtype,
        scale,
        bits,
        data: encode_ints(&ints, dtype),
        len: values.len(),
        max_abs_error,
        saturated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_percentile() {
        let v = [1.0, -4.0, 2.0, 3.0];
        assert_eq!(abs_percentile(&v, 100.0), 4.0);
        assert_eq!(abs_percentile(&v, 75.0), 3.0);
        assert_eq!(abs_percentile(&v, 1.0), 1.0);
        assert_eq!(abs_percentile(&[], 100.0), 0.0);
    }

    #[test]
    fn test_max_maps_to_qmax() {
        let blob = quantize_blob(&[0.5, -1.0, 0.25], 8, 100.0);
        assert_eq!(blob.dtype, DType::I8);
        assert_eq!(blob.values(), vec![64, -127, 32]);
        assert_eq!(blob.saturated, 0);
        assert!(blob.max_abs_error <= blob.scale / 2.0 + 1e-12);
    }

    #[test]
    fn test_round_trip_bound() {
        let values: Vec<f32> = (0..200).map(|i| ((i as f32) * 0.37).sin() * 3.0).collect();
        for bits in [8u8, 16] {
            let blob = quantize_blob(&values, bits, 100.0);
            let back = blob.dequantize();
            for (orig, deq) in values.iter().zip(&back) {
                assert!((*orig as f64 - deq).abs() <= blob.scale / 2.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_percentile_saturates_outliers() {
        let mut values = vec![0.1f32; 99];
        values.push(100.0);
        let blob = quantize_blob(&values, 8, 99.0);
        assert_eq!(blob.saturated, 1);
        assert_eq!(*blob.values().last().unwrap(), 127);
        // Non-saturated values keep fine resolution.
        assert!(blob.max_abs_error < 0.001);
    }

    #[test]
    fn test_all_zero_blob() {
        let blob = quantize_blob(&[0.0, 0.0], 16, 100.0);
        assert_eq!(blob.values(), vec![0, 0]);
        assert_eq!(blob.max_abs_error, 0.0);
    }

    #[test]
    fn test_fixed_scale_biases() {
        let blob = quantize_with_scale(&[1.0, -0.5], 0.001, 32);
        assert_eq!(blob.dtype, DType::I32);
        assert_eq!(blob.values(), vec![1000, -500]);
    }
}
