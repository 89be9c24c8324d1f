// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the transformation pipeline.

/// Errors that abort graph transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// A layer cannot be mapped onto the accelerator.
    #[error("unsupported topology at '{layer}': {detail}")]
    UnsupportedTopology { layer: String, detail: String },

    /// An approximation cannot meet its error bound within hardware limits.
    #[error("quantization error at '{layer}': {detail}")]
    Quantization { layer: String, detail: String },

    /// The graph is not at the stage the pipeline expects.
    #[error("invalid graph state: {0}")]
    InvalidGraphState(String),
}
