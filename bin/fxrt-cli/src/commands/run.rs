// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `fxrt run` command: execute inference on the simulated accelerator.

use super::{banner, open_and_load, parse_values};
use device::ExecutionMode;
use runtime::RuntimeConfig;
use std::path::PathBuf;
use tensor_core::Tensor;

pub fn execute(
    mut config: RuntimeConfig,
    model: PathBuf,
    inputs: Vec<String>,
    steps: usize,
    mode: Option<String>,
    profile: bool,
) -> anyhow::Result<()> {
    banner("fxrt · Inference Runner");

    if let Some(m) = mode {
        config.execution_mode = ExecutionMode::from_str_loose(&m)
            .ok_or_else(|| anyhow::anyhow!("unknown execution mode '{m}'"))?;
    }
    config.enable_profiling |= profile;

    let (mut engine, handle) = open_and_load(config, &model)?;
    let descriptors = engine.model(handle)?.inputs.clone();
    println!("  Model: {}", engine.model(handle)?.summary());
    println!("  Mode:  {}", engine.config().execution_mode);
    println!();

    if inputs.len() != descriptors.len() {
        anyhow::bail!(
            "model has {} inputs but {} --input values were given",
            descriptors.len(),
            inputs.len()
        );
    }
    let tensors = descriptors
        .iter()
        .zip(&inputs)
        .map(|(desc, raw)| {
            let values = parse_values(raw)?;
            Tensor::from_vec(desc.shape.clone(), values)
                .map_err(|e| anyhow::anyhow!("input '{}': {e}", desc.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    for step in 0..steps.max(1) {
        let outputs = engine.infer(handle, &tensors)?;
        let names = &engine.model(handle)?.outputs;
        for (desc, out) in names.iter().zip(&outputs) {
            let values = out.as_f32_slice();
            let shown: Vec<String> = values.iter().take(8).map(|v| format!("{v:.4}")).collect();
            println!(
                "  [{step}] {} = [{}{}]",
                desc.name,
                shown.join(", "),
                if values.len() > 8 { ", ..." } else { "" },
            );
        }
    }
    println!();

    if let Some(summary) = engine.profile_summary(handle)? {
        println!("  Performance:");
        for line in summary.lines() {
            println!("   {line}");
        }
        println!();
    }

    engine.close();
    Ok(())
}
