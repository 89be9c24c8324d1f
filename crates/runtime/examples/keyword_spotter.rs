// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: compile a small keyword-spotting network, run it over a few
//! frames and compare 8-bit against 16-bit weights.
//!
//! The network is a 1-D convolution front end, max pooling, a recurrent
//! affine block and a sigmoid classifier. It shows the whole flow: graph
//! construction, compilation, inference with recurrent state, AOT export
//! and per-layer profiling.
//!
//! ```bash
//! cargo run -p runtime --example keyword_spotter
//! ```

use model_ir::{ActivationFn, EltwiseOp, Graph, GraphBuilder, PoolingKind, Validated};
use runtime::{InferenceEngine, RuntimeConfig};
use tensor_core::{Shape, Tensor};

const CHANNELS: usize = 4;
const FRAME: usize = 20;
const FILTERS: usize = 8;
const HIDDEN: usize = 16;
const CLASSES: usize = 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing.
    tracing_subscriber::fmt().with_env_filter("info").init();

    let frames: Vec<Tensor> = (0..4)
        .map(|f| {
            let values = (0..CHANNELS * FRAME)
                .map(|i| ((i * 7 + f * 13) % 23) as f32 / 23.0 - 0.5)
                .collect();
            Tensor::from_vec(Shape::ncw(1, CHANNELS, FRAME), values)
        })
        .collect::<Result<_, _>>()?;

    println!("{:<10} {:>10} {:>14} {:>12}", "Weights", "Cycles", "Instructions", "Max diff");
    println!("{}", "-".repeat(50));

    let mut reference: Option<Vec<Vec<f32>>> = None;
    for weight_bits in [16u8, 8] {
        let mut config = RuntimeConfig::default();
        config.precision.weight_bits = weight_bits;
        let mut engine = InferenceEngine::with_simulator(config)?.open()?;
        let handle = engine.load_graph(build_graph())?;

        let mut scores = Vec::new();
        for frame in &frames {
            let out = engine.infer(handle, std::slice::from_ref(frame))?;
            scores.push(out[0].as_f32_slice().to_vec());
        }

        let diff = match &reference {
            Some(r) => r
                .iter()
                .flatten()
                .zip(scores.iter().flatten())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max),
            None => 0.0,
        };
        let total = engine.aggregate_counters(handle)?.unwrap_or_default();
        println!(
            "{:<10} {:>10} {:>14} {:>12.5}",
            format!("I{weight_bits}"),
            total.device_cycles,
            engine.model(handle)?.instructions.len(),
            diff,
        );

        if weight_bits == 16 {
            if let Some(profile) = engine.profile_summary(handle)? {
                println!("\n{profile}\n");
            }
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("kws.aot");
            engine.export(handle, &path)?;
            println!("exported {} bytes\n", std::fs::metadata(&path)?.len());
            reference = Some(scores);
        }
        engine.close();
    }
    Ok(())
}

fn weights(n: usize, seed: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (((i * 41 + seed * 17) % 89) as f32 / 89.0 - 0.5) * 0.5)
        .collect()
}

fn build_graph() -> Graph<Validated> {
    let mut b = GraphBuilder::new("kws");
    let hidden = b.state("hidden", Shape::nc(1, HIDDEN));

    let x = b.input("frame", Shape::ncw(1, CHANNELS, FRAME));
    let conv = b.convolution("conv", x, FILTERS, 3, 1, weights(FILTERS * CHANNELS * 3, 1), None);
    let relu = b.activation("conv_relu", conv, ActivationFn::Relu);
    let pool = b.pooling("pool", relu, PoolingKind::Max, 2, 2);

    let pooled = FILTERS * ((FRAME - 2) / 2);
    let proj = b.affine("proj", pool, HIDDEN, weights(HIDDEN * pooled, 2), Some(weights(HIDDEN, 3)));
    let proj_act = b.activation("proj_act", proj, ActivationFn::Identity);
    let prev = b.memory_read("hidden_read", hidden);
    let mixed = b.eltwise("mix", EltwiseOp::Sum, proj_act, prev);
    let h = b.activation("tanh", mixed, ActivationFn::Tanh);
    b.memory_write("hidden_write", h, hidden);

    let logits = b.affine("classifier", h, CLASSES, weights(CLASSES * HIDDEN, 4), None);
    let scores = b.activation("scores", logits, ActivationFn::Sigmoid);
    b.output(scores);
    b.finish().expect("keyword spotter graph is valid")
}
