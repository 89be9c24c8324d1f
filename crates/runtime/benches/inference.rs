// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for compilation and inference on the simulated accelerator.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use model_ir::{ActivationFn, Graph, GraphBuilder, Validated};
use runtime::{compile, InferenceEngine, RuntimeConfig};
use tensor_core::{Shape, Tensor};

/// `width → width → width` MLP with ReLU and sigmoid.
fn mlp(width: usize) -> Graph<Validated> {
    let w = |seed: usize| -> Vec<f32> {
        (0..width * width)
            .map(|i| ((i * 31 + seed) % 97) as f32 / 97.0 - 0.5)
            .collect()
    };
    let mut b = GraphBuilder::new(format!("mlp{width}"));
    let x = b.input("in", Shape::nc(1, width));
    let fc1 = b.affine("fc1", x, width, w(1), Some(vec![0.01; width]));
    let relu = b.activation("relu", fc1, ActivationFn::Relu);
    let fc2 = b.affine("fc2", relu, width, w(2), None);
    let sig = b.activation("sig", fc2, ActivationFn::Sigmoid);
    b.output(sig);
    b.finish().expect("valid graph")
}

fn bench_compile(c: &mut Criterion) {
    let config = RuntimeConfig::default();
    let mut group = c.benchmark_group("compile");
    for width in [32, 128] {
        let graph = mlp(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &graph, |b, g| {
            b.iter(|| compile(black_box(g.clone()), &config).expect("compiles"))
        });
    }
    group.finish();
}

fn bench_infer(c: &mut Criterion) {
    let mut group = c.benchmark_group("infer");
    for profiling in [false, true] {
        let config = RuntimeConfig {
            enable_profiling: profiling,
            ..Default::default()
        };
        let mut engine = InferenceEngine::with_simulator(config)
            .and_then(|e| e.open())
            .expect("engine opens");
        let handle = engine.load_graph(mlp(128)).expect("model loads");
        let input = Tensor::from_vec(Shape::nc(1, 128), vec![0.25; 128]).expect("input");
        let label = if profiling { "profiled" } else { "plain" };
        group.bench_function(label, |b| {
            b.iter(|| engine.infer(handle, black_box(&[input.clone()])).expect("infers"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_infer);
criterion_main!(benches);
