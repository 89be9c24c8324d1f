// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! Intermediate representation for networks compiled to the fixed-point
//! accelerator.
//!
//! - [`LayerKind`] — closed set of computations, source and synthetic.
//! - [`Layer`] — one node: kind, input edges, output shape and origin.
//! - [`Graph`] — layers in topological order plus named recurrent
//!   [`StateDecl`]s, with a **type-state pattern** (`Loaded` → `Validated`)
//!   and a run-time [`CompileStage`].
//! - [`GraphBuilder`] — programmatic construction with shape inference.
//! - [`LayerQuant`] and friends — fixed-point parameters the quantizer
//!   attaches to layers.
//! - [`GraphLoader`] — loads graphs from a JSON manifest + SafeTensors file.
//!
//! # Example
//! ```no_run
//! use model_ir::GraphLoader;
//! use std::path::Path;
//!
//! let graph = GraphLoader::load(Path::new("./models/kws")).unwrap();
//! println!("{}", graph.summary());
//! for layer in graph.iter_layers() {
//!     println!("  {}", layer.summary());
//! }
//! ```

mod builder;
mod error;
pub mod graph;
mod layer;
mod loader;
pub mod manifest;
pub mod quant;

pub use builder::GraphBuilder;
pub use error::ModelError;
pub use graph::{CompileStage, Graph, Loaded, StateDecl, Validated};
pub use layer::{
    output_dtype, ActivationFn, Blob, EltwiseOp, Layer, LayerId, LayerKind, Origin, PoolingKind,
    PwlSegment, StateId, SyntheticKind,
};
pub use loader::{GraphLoader, SafeTensorsFile, WeightSource};
pub use manifest::GraphManifest;
pub use quant::{FixedPwlSegment, LayerQuant, QuantizedBlob, Rescale};
