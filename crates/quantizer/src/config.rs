// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Precision configuration.
//!
//! # TOML Format
//! ```toml
//! [precision]
//! weight_bits = 16
//! bias_bits = 32
//! activation_bits = 16
//! weight_error_bound = 0.01
//! saturation_percentile = 100.0
//! pwl_max_error_percent = 1.0
//! input_range = 16.0
//! # input_scale_factor = 2048.0
//! ```

use crate::QuantizeError;
use serde::{Deserialize, Serialize};
use tensor_core::DType;

/// Bit widths and error bounds used when converting a graph to fixed point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    /// Weight precision: 8 or 16.
    pub weight_bits: u8,
    /// Bias precision: 16 or 32.
    pub bias_bits: u8,
    /// Activation precision: 8 or 16.
    pub activation_bits: u8,
    /// Largest allowed `|dequantized - original|` of a weight, measured over
    /// values that were not saturated.
    pub weight_error_bound: f64,
    /// Percentile of `|w|` that maps to the largest integer; larger values
    /// saturate. 100 means no saturation.
    pub saturation_percentile: f64,
    /// PWL error bound in percent of the activation's output range.
    pub pwl_max_error_percent: f64,
    /// Largest absolute real value expected at the network inputs and in
    /// recurrent state.
    pub input_range: f64,
    /// Explicit input quantization: `integer = real * factor`. Overrides
    /// `input_range` for the inputs when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_scale_factor: Option<f64>,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            weight_bits: 16,
            bias_bits: 32,
            activation_bits: 16,
            weight_error_bound: 0.01,
            saturation_percentile: 100.0,
            pwl_max_error_percent: 1.0,
            input_range: 16.0,
            input_scale_factor: None,
        }
    }
}

/// Largest positive integer representable in `bits` signed bits.
pub fn qmax(bits: u8) -> f64 {
    ((1i64 << (bits.clamp(2, 32) - 1)) - 1) as f64
}

impl PrecisionConfig {
    /// Checks bit widths and bounds.
    pub fn validate(&self) -> Result<(), QuantizeError> {
        let invalid = |msg: String| Err(QuantizeError::InvalidConfig(msg));
        if !matches!(self.weight_bits, 8 | 16) {
            return invalid(format!("weight_bits must be 8 or 16, got {}", self.weight_bits));
        }
        if !matches!(self.bias_bits, 16 | 32) {
            return invalid(format!("bias_bits must be 16 or 32, got {}", self.bias_bits));
        }
        if !matches!(self.activation_bits, 8 | 16) {
            return invalid(format!(
                "activation_bits must be 8 or 16, got {}",
                self.activation_bits
            ));
        }
        if !(self.weight_error_bound > 0.0) {
            return invalid("weight_error_bound must be positive".into());
        }
        if !(self.saturation_percentile > 0.0 && self.saturation_percentile <= 100.0) {
            return invalid("saturation_percentile must be in (0, 100]".into());
        }
        if !(self.pwl_max_error_percent > 0.0) {
            return invalid("pwl_max_error_percent must be positive".into());
        }
        if !(self.input_range > 0.0) {
            return invalid("input_range must be positive".into());
        }
        if let Some(f) = self.input_scale_factor {
            if !(f > 0.0) {
                return invalid("input_scale_factor must be positive".into());
            }
        }
        Ok(())
    }

    pub fn weight_dtype(&self) -> DType {
        DType::for_bits(self.weight_bits).unwrap_or(DType::I16)
    }

    pub fn activation_dtype(&self) -> DType {
        DType::for_bits(self.activation_bits).unwrap_or(DType::I16)
    }

    /// Scale of the network inputs.
    pub fn input_scale(&self) -> f64 {
        match self.input_scale_factor {
            Some(f) => 1.0 / f,
            None => self.input_range / qmax(self.activation_bits),
        }
    }

    /// Scale of recurrent state buffers.
    pub fn state_scale(&self) -> f64 {
        self.input_range / qmax(self.activation_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let c = PrecisionConfig::default();
        c.validate().unwrap();
        assert_eq!(c.weight_dtype(), DType::I16);
        assert_eq!(c.activation_dtype(), DType::I16);
    }

    #[test]
    fn test_qmax() {
        assert_eq!(qmax(8), 127.0);
        assert_eq!(qmax(16), 32767.0);
        assert_eq!(qmax(32), i32::MAX as f64);
    }

    #[test]
    fn test_invalid_bits() {
        let c = PrecisionConfig {
            weight_bits: 12,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(QuantizeError::InvalidConfig(_))));

        let c = PrecisionConfig {
            bias_bits: 8,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_input_scale() {
        let c = PrecisionConfig {
            input_scale_factor: Some(1024.0),
            ..Default::default()
        };
        assert_eq!(c.input_scale(), 1.0 / 1024.0);

        let c = PrecisionConfig {
            input_range: 32767.0,
            ..Default::default()
        };
        assert_eq!(c.input_scale(), 1.0);
    }

    #[test]
    fn test_partial_deserialize() {
        let c: PrecisionConfig = serde_json::from_str(r#"{ "weight_bits": 8 }"#).unwrap();
        assert_eq!(c.weight_bits, 8);
        assert_eq!(c.bias_bits, 32);
        assert_eq!(c.weight_dtype(), DType::I8);
    }
}
