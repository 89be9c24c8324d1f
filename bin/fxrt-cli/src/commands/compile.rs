// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `fxrt compile` command: graph directory → AOT file.

use super::{banner, truncate};
use anyhow::Context;
use runtime::RuntimeConfig;
use std::path::PathBuf;

pub fn execute(
    mut config: RuntimeConfig,
    model: PathBuf,
    output: PathBuf,
    weight_bits: Option<u8>,
) -> anyhow::Result<()> {
    banner("fxrt · Compiler");

    if let Some(bits) = weight_bits {
        config.precision.weight_bits = bits;
    }
    config.validate()?;

    let graph = model_ir::GraphLoader::load(&model)
        .with_context(|| format!("failed to load graph from '{}'", model.display()))?;
    println!("  Source: {}", graph.summary());

    let compilation = runtime::compile(graph, &config)?;
    println!("  {}", compilation.transform.summary());
    println!("  {}", compilation.summary());
    println!();

    println!(
        "  {:<28} {:<12} {:>12} {:>5} {:>10} {:>5} {:>10}",
        "Layer", "Kind", "Scale", "Bits", "W err", "Sat", "PWL err",
    );
    println!("  {}", "-".repeat(90));
    for m in &compilation.metrics {
        println!(
            "  {:<28} {:<12} {:>12.4e} {:>5} {:>10.2e} {:>5} {:>10.2e}",
            truncate(&m.layer, 28),
            m.kind,
            m.output_scale,
            m.output_bits,
            m.weight_max_error,
            m.saturated,
            m.pwl_max_error,
        );
    }
    println!();

    executable::aot::export(&compilation.model, &output)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    println!("  Wrote {}", output.display());
    Ok(())
}
