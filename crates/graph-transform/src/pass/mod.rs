// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`Pass`] trait and the built-in passes.

pub mod alignment;
pub mod diagonal;
pub mod identity;
pub mod pwl;
pub mod topology;

use crate::{PassReport, TransformContext, TransformError};
use model_ir::{Graph, Validated};

/// A graph rewrite.
///
/// A pass either rewrites the sub-patterns it matches or leaves the graph
/// unchanged. Passes are purely algorithmic (no I/O), so each one can be
/// unit-tested on a hand-built graph.
pub trait Pass: Send + Sync {
    /// Human-readable name of this pass.
    fn name(&self) -> &str;

    /// Applies the pass in place.
    fn run(
        &self,
        graph: &mut Graph<Validated>,
        ctx: &TransformContext,
    ) -> Result<PassReport, TransformError>;
}
