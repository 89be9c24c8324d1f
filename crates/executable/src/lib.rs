// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # executable
//!
//! The compiled form of a network and its on-disk encoding.
//!
//! - [`build`] lays out a quantized graph in one device arena and emits
//!   the instruction stream.
//! - [`ExecutableModel`] is the immutable result, loaded by the runtime.
//! - [`aot`] saves and restores models without recompiling.
//!
//! # Example
//! ```no_run
//! use executable::{aot, build};
//! use graph_transform::{transform, HardwareLimits, TransformContext};
//! use model_ir::GraphLoader;
//! use quantizer::{quantize, PrecisionConfig};
//! use std::path::Path;
//!
//! let graph = GraphLoader::load(Path::new("./models/kws")).unwrap();
//! let graph = transform(graph, &TransformContext::default()).unwrap();
//! let (graph, _) = quantize(graph, &PrecisionConfig::default()).unwrap();
//! let model = build(&graph, &HardwareLimits::default()).unwrap();
//! aot::export(&model, Path::new("kws.aot")).unwrap();
//! ```

pub mod aot;
mod builder;
mod error;
mod model;

pub use builder::build;
pub use error::{AotError, BuildError};
pub use model::{
    ExecutableModel, Instruction, MemoryRegion, Operation, RegionKind, ScaleEntry,
    StateDescriptor, TensorDescriptor, TensorRef,
};
