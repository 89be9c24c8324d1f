// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-transform
//!
//! Rewrites a validated source graph into a graph whose layers the
//! accelerator executes natively.
//!
//! # Passes
//!
//! | Order | Pass | Effect |
//! |---|---|---|
//! | 1 | [`ValidateTopology`] | rejects shapes outside [`HardwareLimits`] |
//! | 2 | [`ScaleShiftToDiagonal`] | scale/shift → diagonal affine |
//! | 3 | [`ApproximateActivations`] | activation → PWL segments |
//! | 4 | [`InsertIdentityActivations`] | identity PWL after accumulators |
//! | 5 | [`InsertAlignmentCopies`] | copy misaligned views |
//!
//! # Trait-Based Extensibility
//!
//! All passes implement [`Pass`], so a custom pipeline can be assembled
//! with [`Pipeline::with_passes`]:
//!
//! ```ignore
//! struct FoldConstants;
//! impl Pass for FoldConstants {
//!     fn name(&self) -> &str { "fold-constants" }
//!     fn run(&self, graph: &mut Graph<Validated>, ctx: &TransformContext)
//!         -> Result<PassReport, TransformError> { /* ... */ }
//! }
//! ```
//!
//! # Example
//! ```no_run
//! use graph_transform::{transform, TransformContext};
//! use model_ir::GraphLoader;
//! use std::path::Path;
//!
//! let graph = GraphLoader::load(Path::new("./models/kws")).unwrap();
//! let transformed = transform(graph, &TransformContext::default()).unwrap();
//! println!("{}", transformed.summary());
//! ```

mod error;
mod limits;
pub mod pass;
mod pipeline;
mod report;

pub use error::TransformError;
pub use limits::{align_up, HardwareLimits, TransformContext};
pub use pass::alignment::{view_offsets, InsertAlignmentCopies};
pub use pass::diagonal::ScaleShiftToDiagonal;
pub use pass::identity::InsertIdentityActivations;
pub use pass::pwl::{approximation_error, fit_segments, ApproximateActivations};
pub use pass::topology::ValidateTopology;
pub use pass::Pass;
pub use pipeline::{transform, Pipeline};
pub use report::{PassReport, TransformReport};
