// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model building and the AOT codec.

/// Errors that can occur while laying out a quantized graph.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The graph is not quantized or still contains source-only layers.
    #[error("invalid graph state: {0}")]
    InvalidGraphState(String),

    /// A layer's tensors are inconsistent with its parameters.
    #[error("cannot lay out '{layer}': {detail}")]
    Layout { layer: String, detail: String },
}

/// Errors that can occur while reading or writing AOT files.
#[derive(Debug, thiserror::Error)]
pub enum AotError {
    #[error("AOT I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file was written by an incompatible format version.
    #[error("unsupported AOT format version {found} (expected {expected})")]
    UnsupportedFormatVersion { found: u32, expected: u32 },

    /// Truncated, trailing or inconsistent data.
    #[error("corrupt AOT data: {0}")]
    Corrupt(String),
}
