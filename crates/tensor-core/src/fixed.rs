// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-point arithmetic helpers.
//!
//! A fixed-point value `q` with scale `s` represents the real number
//! `q * s`. All device memory is little-endian.
//!
//! These helpers are the single definition of rounding and saturation used
//! by the quantizer, the simulated accelerator and the runtime, so that a
//! value quantized at compile time and a value produced by the device agree
//! bit for bit.

use crate::DType;

/// Rounds to the nearest integer, ties away from zero.
///
/// Values outside the `i64` range saturate.
#[inline]
pub fn round_half_away(x: f64) -> i64 {
    // `f64::round` rounds half-way cases away from zero; `as` saturates.
    x.round() as i64
}

/// Clamps `value` into the representable range of `dtype`.
#[inline]
pub fn saturate(value: i64, dtype: DType) -> i64 {
    value.clamp(dtype.int_min(), dtype.int_max())
}

/// Quantizes a real value with the given scale.
///
/// Returns the saturated integer and whether saturation occurred.
#[inline]
pub fn quantize(x: f64, scale: f64, dtype: DType) -> (i64, bool) {
    let q = round_half_away(x / scale);
    let s = saturate(q, dtype);
    (s, s != q)
}

/// Maps a fixed-point integer back to its real value.
#[inline]
pub fn dequantize(q: i64, scale: f64) -> f64 {
    q as f64 * scale
}

/// Arithmetic right shift with round-half-up.
#[inline]
pub fn rounding_shift_right(value: i64, shift: u8) -> i64 {
    if shift == 0 {
        value
    } else {
        let shift = shift.min(62);
        (value + (1i64 << (shift - 1))) >> shift
    }
}

/// Reads element `index` of a little-endian buffer holding `dtype` values.
///
/// # Panics
/// Panics if the element lies outside `bytes` or `dtype` is `F32`.
pub fn read_int(bytes: &[u8], dtype: DType, index: usize) -> i64 {
    let w = dtype.size_bytes();
    let b = &bytes[index * w..index * w + w];
    match dtype {
        DType::I8 => b[0] as i8 as i64,
        DType::I16 => i16::from_le_bytes([b[0], b[1]]) as i64,
        DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
        DType::F32 => panic!("read_int called on an f32 buffer"),
    }
}

/// Writes `value` (saturated to `dtype`) as element `index` of `bytes`.
///
/// # Panics
/// Panics if the element lies outside `bytes` or `dtype` is `F32`.
pub fn write_int(bytes: &mut [u8], dtype: DType, index: usize, value: i64) {
    let w = dtype.size_bytes();
    let v = saturate(value, dtype);
    let dst = &mut bytes[index * w..index * w + w];
    match dtype {
        DType::I8 => dst[0] = (v as i8) as u8,
        DType::I16 => dst.copy_from_slice(&(v as i16).to_le_bytes()),
        DType::I32 => dst.copy_from_slice(&(v as i32).to_le_bytes()),
        DType::F32 => panic!("write_int called on an f32 buffer"),
    }
}

/// Encodes integers into a freshly allocated little-endian buffer.
pub fn encode_ints(values: &[i64], dtype: DType) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * dtype.size_bytes()];
    for (i, &v) in values.iter().enumerate() {
        write_int(&mut out, dtype, i, v);
    }
    out
}

/// Decodes every element of a little-endian integer buffer.
pub fn decode_ints(bytes: &[u8], dtype: DType) -> Vec<i64> {
    let n = bytes.len() / dtype.size_bytes();
    (0..n).map(|i| read_int(bytes, dtype, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away() {
        assert_eq!(round_half_away(2.5), 3);
        assert_eq!(round_half_away(-2.5), -3);
        assert_eq!(round_half_away(2.4999), 2);
        assert_eq!(round_half_away(-0.5), -1);
        assert_eq!(round_half_away(1e30), i64::MAX);
    }

    #[test]
    fn test_quantize_saturates() {
        let (q, sat) = quantize(10.0, 0.001, DType::I8);
        assert_eq!(q, 127);
        assert!(sat);

        let (q, sat) = quantize(0.05, 0.01, DType::I16);
        assert_eq!(q, 5);
        assert!(!sat);
    }

    #[test]
    fn test_rounding_shift_right() {
        assert_eq!(rounding_shift_right(5, 1), 3);
        assert_eq!(rounding_shift_right(4, 1), 2);
        assert_eq!(rounding_shift_right(-5, 1), -2);
        assert_eq!(rounding_shift_right(7, 0), 7);
    }

    #[test]
    fn test_read_write_int() {
        let mut buf = vec![0u8; 8];
        write_int(&mut buf, DType::I16, 1, -1234);
        assert_eq!(read_int(&buf, DType::I16, 1), -1234);

        write_int(&mut buf, DType::I32, 1, 70_000);
        assert_eq!(read_int(&buf, DType::I32, 1), 70_000);

        write_int(&mut buf, DType::I8, 0, 300);
        assert_eq!(read_int(&buf, DType::I8, 0), 127);
    }

    #[test]
    fn test_encode_decode() {
        let values = vec![1, -2, 3, i16::MAX as i64];
        let bytes = encode_ints(&values, DType::I16);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_ints(&bytes, DType::I16), values);
    }
}
