// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer quantization diagnostics.

use serde::Serialize;

/// What quantization did to one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantizationMetric {
    /// Layer name.
    pub layer: String,
    /// Layer kind label.
    pub kind: String,
    /// Synthetic kind label, if the layer was inserted by the compiler.
    pub synthetic: Option<String>,
    pub output_scale: f64,
    /// Achieved output precision in bits.
    pub output_bits: u8,
    /// Achieved weight precision in bits, for layers with weights.
    pub weight_bits: Option<u8>,
    /// Largest absolute weight error over non-saturated values.
    pub weight_max_error: f64,
    /// Number of saturated weights and biases.
    pub saturated: usize,
    pub pwl_segments: usize,
    /// Largest absolute PWL error against the exact function, measured on
    /// the fixed-point encoding.
    pub pwl_max_error: f64,
}

impl QuantizationMetric {
    pub(crate) fn new(layer: &str, kind: &str, synthetic: Option<&str>) -> Self {
        Self {
            layer: layer.to_string(),
            kind: kind.to_string(),
            synthetic: synthetic.map(str::to_string),
            output_scale: 0.0,
            output_bits: 0,
            weight_bits: None,
            weight_max_error: 0.0,
            saturated: 0,
            pwl_segments: 0,
            pwl_max_error: 0.0,
        }
    }

    /// Returns a one-line human readable description.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} ({}): {} bit out, scale {:.3e}",
            self.layer, self.kind, self.output_bits, self.output_scale
        );
        if let Some(bits) = self.weight_bits {
            s.push_str(&format!(", w{} err {:.2e}", bits, self.weight_max_error));
        }
        if self.pwl_segments > 0 {
            s.push_str(&format!(
                ", {} segments err {:.2e}",
                self.pwl_segments, self.pwl_max_error
            ));
        }
        if self.saturated > 0 {
            s.push_str(&format!(", {} saturated", self.saturated));
        }
        if let Some(kind) = &self.synthetic {
            s.push_str(&format!(" [{kind}]"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let mut m = QuantizationMetric::new("fc", "affine", None);
        m.output_bits = 32;
        m.weight_bits = Some(16);
        m.saturated = 2;
        let s = m.summary();
        assert!(s.starts_with("fc (affine): 32 bit out"));
        assert!(s.contains("w16"));
        assert!(s.contains("2 saturated"));
        assert!(!s.contains("segments"));
    }

    #[test]
    fn test_serializes() {
        let m = QuantizationMetric::new("act", "pwl", Some("pwl"));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["layer"], "act");
        assert_eq!(json["synthetic"], "pwl");
    }
}
