// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # fxrt
//!
//! Command-line interface for the fixed-point accelerator runtime.
//!
//! ## Usage
//! ```bash
//! # Compile a graph directory (manifest + SafeTensors) to an AOT file
//! fxrt compile --model ./models/kws --output kws.aot
//!
//! # Run inference from an AOT file or a graph directory
//! fxrt run --model kws.aot --input 0.1,0.2,0.3 --steps 4 --profile
//!
//! # Inspect a graph or a compiled model
//! fxrt inspect --model kws.aot
//!
//! # Write the accelerator's native dump of a model
//! fxrt dump --model kws.aot --output kws.fxnative
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fxrt",
    about = "Compiler and runtime for a fixed-point neural-network accelerator",
    version,
    author
)]
struct Cli {
    /// Path to a TOML runtime configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a graph directory into an AOT model file.
    Compile {
        /// Graph directory containing `model.json` and `model.safetensors`.
        #[arg(short, long)]
        model: PathBuf,

        /// AOT file to write.
        #[arg(short, long)]
        output: PathBuf,

        /// Weight precision in bits (8 or 16); overrides the config.
        #[arg(long)]
        weight_bits: Option<u8>,
    },

    /// Run inference on a graph directory or AOT file.
    Run {
        /// Graph directory or AOT file.
        #[arg(short, long)]
        model: PathBuf,

        /// Comma-separated values of one input; repeat once per input.
        #[arg(short, long)]
        input: Vec<String>,

        /// Number of consecutive inferences (recurrent state carries over).
        #[arg(long, default_value_t = 1)]
        steps: usize,

        /// Execution mode: hardware, software-exact, auto; overrides the config.
        #[arg(long)]
        mode: Option<String>,

        /// Print per-layer performance counters.
        #[arg(long)]
        profile: bool,
    },

    /// Inspect a graph directory or a compiled model.
    Inspect {
        /// Graph directory or AOT file.
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Write the accelerator's native description of a model.
    Dump {
        /// Graph directory or AOT file.
        #[arg(short, long)]
        model: PathBuf,

        /// File to write; defaults to `<dump_path>/<model>.fxnative`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compile {
            model,
            output,
            weight_bits,
        } => commands::compile::execute(config, model, output, weight_bits),
        Commands::Run {
            model,
            input,
            steps,
            mode,
            profile,
        } => commands::run::execute(config, model, input, steps, mode, profile),
        Commands::Inspect { model } => commands::inspect::execute(config, model),
        Commands::Dump { model, output } => commands::dump::execute(config, model, output),
    }
}
