// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! device_memory = "64M"
//! wait_timeout_ms = 1000
//! enable_profiling = true
//! execution_mode = "auto"
//! dump_path = "./dumps"
//!
//! [precision]
//! weight_bits = 16
//! weight_error_bound = 0.01
//!
//! [hardware]
//! max_pwl_segments = 128
//! alignment_bytes = 64
//! ```

use device::{ExecutionMode, MemoryBudget};
use graph_transform::{HardwareLimits, TransformContext};
use quantizer::PrecisionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Device memory of the simulated accelerator (human-readable, e.g. `"64M"`).
    pub device_memory: String,
    /// Bound on each wait for a submitted inference.
    pub wait_timeout_ms: u64,
    /// Whether models are loaded with per-layer performance counters.
    pub enable_profiling: bool,
    /// Execution mode passed with every submission.
    pub execution_mode: ExecutionMode,
    /// Directory native dumps are written to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_path: Option<PathBuf>,
    pub precision: PrecisionConfig,
    pub hardware: HardwareLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_memory: "64M".to_string(),
            wait_timeout_ms: 1000,
            enable_profiling: true,
            execution_mode: ExecutionMode::Auto,
            dump_path: None,
            precision: PrecisionConfig::default(),
            hardware: HardwareLimits::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::ConfigError(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML parse error: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML serialise error: {e}"))
        })
    }

    /// Checks every field that can be checked without a device.
    pub fn validate(&self) -> Result<(), super::RuntimeError> {
        self.parse_budget()?;
        if self.wait_timeout_ms == 0 {
            return Err(super::RuntimeError::ConfigError(
                "wait_timeout_ms must be positive".into(),
            ));
        }
        self.precision
            .validate()
            .map_err(|e| super::RuntimeError::ConfigError(e.to_string()))?;
        let hw = &self.hardware;
        if hw.max_pwl_segments < 2 {
            return Err(super::RuntimeError::ConfigError(
                "hardware.max_pwl_segments must be at least 2".into(),
            ));
        }
        for (name, value) in [
            ("alignment_bytes", hw.alignment_bytes),
            ("allocation_granularity", hw.allocation_granularity),
        ] {
            if value == 0 || !value.is_power_of_two() {
                return Err(super::RuntimeError::ConfigError(format!(
                    "hardware.{name} must be a power of two, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Parses the device memory string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, super::RuntimeError> {
        MemoryBudget::parse(&self.device_memory)
            .map_err(|e| super::RuntimeError::ConfigError(format!("invalid device_memory: {e}")))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// The context the transformation passes run in.
    pub fn transform_context(&self) -> TransformContext {
        TransformContext {
            limits: self.hardware.clone(),
            pwl_max_error_percent: self.precision.pwl_max_error_percent,
            activation_dtype: self.precision.activation_dtype(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.device_memory, "64M");
        assert_eq!(c.execution_mode, ExecutionMode::Auto);
        assert!(c.enable_profiling);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_parse_budget() {
        let c = RuntimeConfig {
            device_memory: "256K".into(),
            ..Default::default()
        };
        assert_eq!(c.parse_budget().unwrap(), MemoryBudget::from_kb(256));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
device_memory = "1M"
wait_timeout_ms = 50
enable_profiling = false
execution_mode = "software-exact"
dump_path = "/tmp/dumps"

[precision]
weight_bits = 8
weight_error_bound = 0.05

[hardware]
max_pwl_segments = 16
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.parse_budget().unwrap(), MemoryBudget::from_mb(1));
        assert_eq!(c.wait_timeout(), Duration::from_millis(50));
        assert!(!c.enable_profiling);
        assert_eq!(c.execution_mode, ExecutionMode::SoftwareExact);
        assert_eq!(c.dump_path, Some(PathBuf::from("/tmp/dumps")));
        assert_eq!(c.precision.weight_bits, 8);
        assert_eq!(c.precision.activation_bits, 16);
        assert_eq!(c.hardware.max_pwl_segments, 16);
        assert_eq!(c.hardware.alignment_bytes, 64);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(RuntimeConfig::from_toml("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            wait_timeout_ms: 25,
            dump_path: Some(PathBuf::from("out")),
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_invalid_values() {
        let bad = [
            "device_memory = \"lots\"",
            "wait_timeout_ms = 0",
            "[precision]\nweight_bits = 12",
            "[hardware]\nalignment_bytes = 48",
            "execution_mode = \"gpu\"",
        ];
        for toml in bad {
            assert!(RuntimeConfig::from_toml(toml).is_err(), "accepted: {toml}");
        }
    }

    #[test]
    fn test_transform_context() {
        let mut c = RuntimeConfig::default();
        c.precision.pwl_max_error_percent = 0.5;
        c.hardware.max_pwl_segments = 32;
        let ctx = c.transform_context();
        assert_eq!(ctx.pwl_max_error_percent, 0.5);
        assert_eq!(ctx.limits.max_pwl_segments, 32);
    }

    #[test]
    fn test_from_file_missing() {
        let err = RuntimeConfig::from_file(Path::new("/nonexistent/fxrt.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
