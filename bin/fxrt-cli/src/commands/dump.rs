// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `fxrt dump` command: write the accelerator's native model description.

use super::{banner, open_and_load};
use anyhow::Context;
use runtime::RuntimeConfig;
use std::path::PathBuf;

pub fn execute(config: RuntimeConfig, model: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    banner("fxrt · Native Dump");

    if output.is_none() && config.dump_path.is_none() {
        anyhow::bail!("no --output given and no dump_path configured");
    }
    let dump_dir = config.dump_path.clone();
    let (mut engine, handle) = open_and_load(config, &model)?;
    let bytes = engine.dump_native(handle)?;

    if let Some(path) = output {
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        println!("  Wrote {} bytes to {}", bytes.len(), path.display());
    } else if let Some(dir) = dump_dir {
        let path = runtime::dump_file(&dir, &engine.model(handle)?.name);
        println!("  Wrote {} bytes to {}", bytes.len(), path.display());
    }
    engine.close();
    Ok(())
}
