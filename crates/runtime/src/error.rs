// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime.

use device::DeviceError;
use executable::{AotError, BuildError};
use graph_transform::TransformError;
use model_ir::ModelError;
use quantizer::QuantizeError;
use std::fmt;
use std::time::Duration;
use tensor_core::TensorError;

/// Errors surfaced to callers of the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Loading or validating the source graph failed.
    #[error("model error: {0}")]
    ModelError(#[from] ModelError),

    #[error("transform error: {0}")]
    TransformError(#[from] TransformError),

    #[error("quantization failed: {0}")]
    QuantizeError(#[from] QuantizeError),

    #[error("build error: {0}")]
    BuildError(#[from] BuildError),

    #[error("AOT error: {0}")]
    AotError(#[from] AotError),

    #[error("device error: {0}")]
    DeviceError(#[from] DeviceError),

    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),

    /// The device did not complete a request within the wait timeout.
    #[error("device did not complete within {0:?}")]
    Timeout(Duration),

    /// A previous request timed out; the session must be closed and reopened.
    #[error("device session unusable after a timeout; close and reopen it")]
    SessionPoisoned,

    /// A model handle does not refer to a loaded model.
    #[error("unknown model handle {0}")]
    UnknownModel(u64),

    /// Caller-supplied tensors or state handles do not match the model.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A layer or shape the pipeline cannot map to the accelerator.
    UnsupportedTopology,
    /// An error bound is unreachable within hardware limits.
    QuantizationError,
    /// A compile stage was invoked on a graph at the wrong stage.
    InvalidGraphState,
    DeviceUnavailable,
    DeviceFault,
    Timeout,
    UnsupportedFormatVersion,
    InvalidInput,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedTopology => "unsupported-topology",
            Self::QuantizationError => "quantization-error",
            Self::InvalidGraphState => "invalid-graph-state",
            Self::DeviceUnavailable => "device-unavailable",
            Self::DeviceFault => "device-fault",
            Self::Timeout => "timeout",
            Self::UnsupportedFormatVersion => "unsupported-format-version",
            Self::InvalidInput => "invalid-input",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelError(ModelError::Io { .. }) => ErrorKind::Io,
            Self::ModelError(_) => ErrorKind::InvalidInput,
            Self::TransformError(e) => match e {
                TransformError::UnsupportedTopology { .. } => ErrorKind::UnsupportedTopology,
                TransformError::Quantization { .. } => ErrorKind::QuantizationError,
                TransformError::InvalidGraphState(_) => ErrorKind::InvalidGraphState,
            },
            Self::QuantizeError(e) => match e {
                QuantizeError::Quantization { .. } => ErrorKind::QuantizationError,
                QuantizeError::InvalidGraphState(_) => ErrorKind::InvalidGraphState,
                QuantizeError::InvalidConfig(_) => ErrorKind::Config,
            },
            Self::BuildError(_) => ErrorKind::InvalidGraphState,
            Self::AotError(e) => match e {
                AotError::UnsupportedFormatVersion { .. } => ErrorKind::UnsupportedFormatVersion,
                AotError::Io(_) => ErrorKind::Io,
                AotError::Corrupt(_) => ErrorKind::InvalidInput,
            },
            Self::DeviceError(e) => match e {
                DeviceError::Unavailable(_) | DeviceError::NotOpen => ErrorKind::DeviceUnavailable,
                DeviceError::InvalidBudget(_) => ErrorKind::Config,
                _ => ErrorKind::DeviceFault,
            },
            Self::TensorError(_) | Self::UnknownModel(_) | Self::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::SessionPoisoned => ErrorKind::DeviceUnavailable,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}
