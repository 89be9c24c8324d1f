// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

/// Enumerates the numeric types that appear on either side of the device
/// boundary.
///
/// Host tensors are always `F32`. Device memory regions hold one of the
/// signed integer types: narrow activations and weights are `I8`/`I16`,
/// accumulators and biases are `I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point (host only).
    F32,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 => 4,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
        }
    }

    /// Returns the narrowest integer type able to hold `bits` signed bits.
    ///
    /// Returns `None` for zero or more than 32 bits.
    pub fn for_bits(bits: u8) -> Option<Self> {
        match bits {
            1..=8 => Some(DType::I8),
            9..=16 => Some(DType::I16),
            17..=32 => Some(DType::I32),
            _ => None,
        }
    }

    /// Returns `true` for the integer (device-side) types.
    pub fn is_integer(self) -> bool {
        !matches!(self, DType::F32)
    }

    /// Largest value representable by this integer type.
    ///
    /// For `F32` this returns `i64::MAX`, i.e. no saturation.
    pub fn int_max(self) -> i64 {
        match self {
            DType::I8 => i8::MAX as i64,
            DType::I16 => i16::MAX as i64,
            DType::I32 => i32::MAX as i64,
            DType::F32 => i64::MAX,
        }
    }

    /// Smallest value representable by this integer type.
    pub fn int_min(self) -> i64 {
        match self {
            DType::I8 => i8::MIN as i64,
            DType::I16 => i16::MIN as i64,
            DType::I32 => i32::MIN as i64,
            DType::F32 => i64::MIN,
        }
    }

    /// Stable numeric tag used by binary encoders.
    pub fn tag(self) -> u8 {
        match self {
            DType::F32 => 0,
            DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 => 3,
        }
    }

    /// Inverse of [`DType::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::I8),
            2 => Some(DType::I16),
            3 => Some(DType::I32),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_bits() {
        assert_eq!(DType::for_bits(8), Some(DType::I8));
        assert_eq!(DType::for_bits(12), Some(DType::I16));
        assert_eq!(DType::for_bits(16), Some(DType::I16));
        assert_eq!(DType::for_bits(32), Some(DType::I32));
        assert_eq!(DType::for_bits(0), None);
        assert_eq!(DType::for_bits(33), None);
    }

    #[test]
    fn test_limits() {
        assert_eq!(DType::I16.int_max(), 32767);
        assert_eq!(DType::I16.int_min(), -32768);
        assert_eq!(DType::I8.int_max(), 127);
    }

    #[test]
    fn test_tag_roundtrip() {
        for d in [DType::F32, DType::I8, DType::I16, DType::I32] {
            assert_eq!(DType::from_tag(d.tag()), Some(d));
        }
        assert_eq!(DType::from_tag(9), None);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&DType::I16).unwrap(), "\"i16\"");
    }
}
