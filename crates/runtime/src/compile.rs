// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The compilation chain: transform, quantize, build.
//!
//! Compilation touches no device state, so it can run on any thread while
//! another context executes inference.

use crate::{RuntimeConfig, RuntimeError};
use executable::ExecutableModel;
use graph_transform::{Pipeline, TransformReport};
use model_ir::{Graph, Validated};
use quantizer::QuantizationMetric;
use std::time::{Duration, Instant};

/// A compiled model together with the diagnostics of each stage.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub model: ExecutableModel,
    pub transform: TransformReport,
    /// One entry per layer of the quantized graph, in layer order.
    pub metrics: Vec<QuantizationMetric>,
    pub duration: Duration,
}

impl Compilation {
    /// Returns a summary string describing the compilation.
    pub fn summary(&self) -> String {
        let worst = self
            .metrics
            .iter()
            .map(|m| m.weight_max_error)
            .fold(0.0f64, f64::max);
        format!(
            "Compiled '{}' in {:.2}ms: {} synthetic layers inserted, {} rewritten, \
             {} instructions, worst weight error {:.2e}",
            self.model.name,
            self.duration.as_secs_f64() * 1000.0,
            self.transform.total_inserted(),
            self.transform.total_rewritten(),
            self.model.instructions.len(),
            worst,
        )
    }
}

/// Compiles a validated source graph into an executable model.
///
/// Any stage failure aborts the whole compilation; no partial model is
/// returned.
pub fn compile(graph: Graph<Validated>, config: &RuntimeConfig) -> Result<Compilation, RuntimeError> {
    let started = Instant::now();
    tracing::info!("compiling {}", graph.summary());

    let (graph, transform) = Pipeline::default().run(graph, &config.transform_context())?;

    let (graph, metrics) = quantizer::quantize(graph, &config.precision)?;
    for m in &metrics {
        tracing::debug!("{}", m.summary());
    }

    let model = executable::build(&graph, &config.hardware)?;
    let compilation = Compilation {
        model,
        transform,
        metrics,
        duration: started.elapsed(),
    };
    tracing::info!("{}", compilation.summary());
    Ok(compilation)
}
