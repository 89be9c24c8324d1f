// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for quantization.

/// Errors that can occur while converting a graph to fixed point.
#[derive(Debug, thiserror::Error)]
pub enum QuantizeError {
    /// The graph has not been transformed, or still holds source-only kinds.
    #[error("invalid graph state: {0}")]
    InvalidGraphState(String),

    /// The configured error bound cannot be met.
    #[error("quantization error at '{layer}': {detail}")]
    Quantization { layer: String, detail: String },

    /// The precision configuration is inconsistent.
    #[error("invalid precision config: {0}")]
    InvalidConfig(String),
}
