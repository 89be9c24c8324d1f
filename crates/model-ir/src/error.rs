// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Failures while reading a network description or checking a graph.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A file of the model directory could not be opened or read.
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed graph manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest names a parameter tensor the parameter file lacks.
    #[error("parameter tensor '{name}' is missing")]
    MissingParameter { name: String },

    /// The parameter file is corrupt or holds a tensor of the wrong type.
    #[error("unusable parameter file: {0}")]
    Parameters(String),

    /// Wrong arity, blob size or shape on a single layer.
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// Layer order, edges or outputs do not form a valid graph.
    #[error("invalid topology: {0}")]
    Topology(String),

    /// A state buffer is declared twice or lacks exactly one writer.
    #[error("invalid state '{state}': {detail}")]
    State { state: String, detail: String },
}

impl ModelError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
