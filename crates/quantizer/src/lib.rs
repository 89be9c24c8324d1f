// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # quantizer
//!
//! Converts a transformed graph to fixed point: picks a scale for every
//! layer output, quantizes weight and bias blobs, converts PWL segments to
//! the device encoding and reports per-layer error metrics.
//!
//! Real values relate to integers by `real = integer * scale`. Rounding is
//! to nearest with ties away from zero; values outside the representable
//! range saturate.
//!
//! # Example
//! ```no_run
//! use graph_transform::{transform, TransformContext};
//! use model_ir::GraphLoader;
//! use quantizer::{quantize, PrecisionConfig};
//! use std::path::Path;
//!
//! let graph = GraphLoader::load(Path::new("./models/kws")).unwrap();
//! let graph = transform(graph, &TransformContext::default()).unwrap();
//! let (graph, metrics) = quantize(graph, &PrecisionConfig::default()).unwrap();
//! for m in &metrics {
//!     println!("{}", m.summary());
//! }
//! ```

pub mod blob;
mod config;
mod error;
mod metrics;
pub mod pwl;
mod quantize;

pub use config::{qmax, PrecisionConfig};
pub use error::QuantizeError;
pub use metrics::QuantizationMetric;
pub use quantize::quantize;
