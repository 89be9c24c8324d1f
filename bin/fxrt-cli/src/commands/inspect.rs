// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `fxrt inspect` command: display a graph or a compiled model.
//!
//! A directory is read as a source graph and listed layer by layer; a file
//! is read as an AOT model and printed with its region table and
//! instruction stream.

use super::{banner, truncate};
use anyhow::Context;
use runtime::RuntimeConfig;
use std::path::{Path, PathBuf};

pub fn execute(config: RuntimeConfig, model: PathBuf) -> anyhow::Result<()> {
    banner("fxrt · Model Inspector");
    if model.is_dir() {
        inspect_graph(&config, &model)
    } else {
        inspect_aot(&model)
    }
}

fn inspect_graph(config: &RuntimeConfig, dir: &Path) -> anyhow::Result<()> {
    let graph = model_ir::GraphLoader::load(dir)
        .with_context(|| format!("failed to load graph from '{}'", dir.display()))?;

    println!("  {}", graph.summary());
    println!();
    println!(
        "  {:<4} {:<28} {:<14} {:<14} {:>8}",
        "Id", "Name", "Kind", "Shape", "Params",
    );
    println!("  {}", "-".repeat(72));
    for layer in graph.iter_layers() {
        println!(
            "  {:<4} {:<28} {:<14} {:<14} {:>8}",
            layer.id.to_string(),
            truncate(&layer.name, 28),
            layer.kind.as_str(),
            layer.output_shape.to_string(),
            layer.kind.num_parameters(),
        );
    }
    for state in graph.states() {
        println!("  state {:<22} {}", state.name, state.shape);
    }
    println!();

    // A dry run shows what compilation would do without writing anything.
    match runtime::compile(graph, config) {
        Ok(c) => println!("  {}", c.summary()),
        Err(e) => println!("  Compilation would fail ({}): {e}", e.kind()),
    }
    println!();
    Ok(())
}

fn inspect_aot(path: &Path) -> anyhow::Result<()> {
    let model = executable::aot::import(path)
        .with_context(|| format!("failed to import '{}'", path.display()))?;
    if let Err(e) = model.check_layout() {
        tracing::warn!("layout check failed: {e}");
    }

    println!("  {}", model.summary());
    println!();
    println!(
        "  {:<4} {:<28} {:<10} {:>10} {:>10} {:<5}",
        "Id", "Region", "Kind", "Offset", "Size", "Type",
    );
    println!("  {}", "-".repeat(72));
    for r in &model.regions {
        println!(
            "  {:<4} {:<28} {:<10} {:>10} {:>10} {:<5}",
            r.id,
            truncate(&r.name, 28),
            r.kind.as_str(),
            r.offset,
            r.size,
            r.dtype.to_string(),
        );
    }
    println!();
    print!("{model}");
    println!();
    Ok(())
}
