// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware limits of the accelerator family and the context passes run in.

use serde::{Deserialize, Serialize};
use tensor_core::DType;

/// Shape and layout constraints of the accelerator.
///
/// Deserialized from the `[hardware]` table of the runtime configuration;
/// every field has a default matching the reference device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareLimits {
    /// Maximum segments in one PWL activation.
    pub max_pwl_segments: usize,
    /// Required byte alignment of every buffer the device reads.
    pub alignment_bytes: usize,
    /// Device memory is granted in multiples of this many bytes.
    pub allocation_granularity: usize,
    /// Maximum `in_channels * kernel` of a convolution filter.
    pub max_conv_kernel_elements: usize,
    pub max_conv_filters: usize,
    /// Filter count must be a multiple of this.
    pub conv_filter_multiple: usize,
    pub max_pool_window: usize,
    /// Maximum elements of any single activation vector.
    pub max_layer_elements: usize,
}

impl Default for HardwareLimits {
    fn default() -> Self {
        Self {
            max_pwl_segments: 128,
            alignment_bytes: 64,
            allocation_granularity: 4096,
            max_conv_kernel_elements: 768,
            max_conv_filters: 1024,
            conv_filter_multiple: 4,
            max_pool_window: 6,
            max_layer_elements: 65_536,
        }
    }
}

impl HardwareLimits {
    /// Rounds `n` up to the buffer alignment.
    pub fn align(&self, n: usize) -> usize {
        align_up(n, self.alignment_bytes)
    }

    /// Rounds `n` up to the allocation granularity.
    pub fn granular(&self, n: usize) -> usize {
        align_up(n, self.allocation_granularity)
    }
}

/// Rounds `n` up to a multiple of `to` (no-op when `to` is 0 or 1).
pub fn align_up(n: usize, to: usize) -> usize {
    if to <= 1 {
        n
    } else {
        n.div_ceil(to) * to
    }
}

/// Everything a pass needs besides the graph.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub limits: HardwareLimits,
    /// PWL error bound, percent of the activation's output range.
    pub pwl_max_error_percent: f64,
    /// Element type of narrow activations on the device.
    pub activation_dtype: DType,
}

impl Default for TransformContext {
    fn default() -> Self {
        Self {
            limits: HardwareLimits::default(),
            pwl_max_error_percent: 1.0,
            activation_dtype: DType::I16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn test_limits_partial_deserialize() {
        let limits: HardwareLimits =
            serde_json::from_str(r#"{ "max_pwl_segments": 16 }"#).unwrap();
        assert_eq!(limits.max_pwl_segments, 16);
        assert_eq!(limits.alignment_bytes, 64);
        assert_eq!(limits.granular(5000), 8192);
    }
}
