// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and the helpers they share.

pub mod compile;
pub mod dump;
pub mod inspect;
pub mod run;

use anyhow::Context;
use runtime::{InferenceEngine, ModelHandle, Ready, RuntimeConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the `fmt` subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(p) => RuntimeConfig::from_file(p)
            .with_context(|| format!("failed to load config '{}'", p.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Opens a simulator-backed engine and loads `model`: a graph directory
/// is compiled, anything else is read as an AOT file.
pub fn open_and_load(
    config: RuntimeConfig,
    model: &Path,
) -> anyhow::Result<(InferenceEngine<Ready>, ModelHandle)> {
    let mut engine = InferenceEngine::with_simulator(config)?.open()?;
    let handle = if model.is_dir() {
        let graph = model_ir::GraphLoader::load(model)
            .with_context(|| format!("failed to load graph from '{}'", model.display()))?;
        engine.load_graph(graph)?
    } else {
        engine
            .load_aot(model)
            .with_context(|| format!("failed to import '{}'", model.display()))?
    };
    Ok((engine, handle))
}

/// Parses `"0.5, -1,2e-3"` into values.
pub fn parse_values(s: &str) -> anyhow::Result<Vec<f32>> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f32>()
                .with_context(|| format!("'{v}' is not a number"))
        })
        .collect()
}

/// Truncates a string with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Prints a banner box around `title`.
pub fn banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║ {:^52} ║", title);
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}
