// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor construction.

use crate::Shape;

/// Errors that can occur when building or converting tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The number of values does not match the shape.
    #[error("element count mismatch: shape {shape} needs {expected} values, got {actual}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    /// Two shapes are incompatible for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value at index {index} in {op}")]
    NonFinite { op: &'static str, index: usize },
}
