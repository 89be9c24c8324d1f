// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end compilation and inference.
//!
//! These tests exercise the complete flow from graph construction →
//! transformation → quantization → layout → device execution, proving that
//! the crates compose correctly and that the engine lifecycle works
//! end-to-end.

use device::{Call, FakeAccelerator};
use graph_transform::{InsertAlignmentCopies, Pass, Pipeline};
use model_ir::{
    ActivationFn, EltwiseOp, Graph, GraphBuilder, Origin, PoolingKind, SyntheticKind, Validated,
};
use runtime::{compile, dump_file, ErrorKind, InferenceEngine, Ready, RuntimeConfig};
use tensor_core::{Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

/// Deterministic weights in `[-0.5, 0.5)`.
fn weights(n: usize, seed: usize) -> Vec<f32> {
    (0..n)
        .map(|i| ((i * 37 + seed * 11) % 101) as f32 / 101.0 - 0.5)
        .collect()
}

fn engine(config: RuntimeConfig) -> InferenceEngine<Ready> {
    InferenceEngine::with_simulator(config).unwrap().open().unwrap()
}

fn fake_engine(fake: FakeAccelerator) -> InferenceEngine<Ready> {
    InferenceEngine::new(RuntimeConfig::default(), Box::new(fake))
        .open()
        .unwrap()
}

fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {i}: got {a}, expected {e} (tolerance {tolerance})"
        );
    }
}

/// 10 → 10 fully connected layer with biases.
fn affine_10x10() -> (Graph<Validated>, Vec<f32>, Vec<f32>) {
    let w = weights(100, 1);
    let b = weights(10, 2);
    let mut builder = GraphBuilder::new("affine10");
    let x = builder.input("in", Shape::nc(1, 10));
    let fc = builder.affine("fc", x, 10, w.clone(), Some(b.clone()));
    builder.output(fc);
    (builder.finish().unwrap(), w, b)
}

/// `in → sum(in, h) → tanh → (out, h)`.
fn recurrent(width: usize) -> Graph<Validated> {
    let mut b = GraphBuilder::new("rnn");
    let h = b.state("h", Shape::nc(1, width));
    let x = b.input("in", Shape::nc(1, width));
    let prev = b.memory_read("h_read", h);
    let sum = b.eltwise("sum", EltwiseOp::Sum, x, prev);
    let act = b.activation("act", sum, ActivationFn::Tanh);
    b.memory_write("h_write", act, h);
    b.output(act);
    b.finish().unwrap()
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn test_affine_matches_reference() {
    let (graph, w, b) = affine_10x10();
    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(graph).unwrap();

    let input: Vec<f32> = (1..=10).map(|v| v as f32).collect();
    let expected: Vec<f32> = (0..10)
        .map(|o| b[o] + (0..10).map(|i| w[o * 10 + i] * input[i]).sum::<f32>())
        .collect();

    let x = Tensor::from_vec(Shape::nc(1, 10), input).unwrap();
    let outputs = engine.infer(handle, &[x]).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_close(outputs[0].as_f32_slice(), &expected, 0.01);
}

#[test]
fn test_unsupported_activation_tight_bound() {
    let mut b = GraphBuilder::new("sigmoid");
    let x = b.input("in", Shape::nc(1, 8));
    let fc = b.affine("fc", x, 8, weights(64, 3), None);
    let act = b.activation("sig", fc, ActivationFn::Sigmoid);
    b.output(act);
    let graph = b.finish().unwrap();

    let mut config = RuntimeConfig::default();
    config.precision.pwl_max_error_percent = 0.0001;
    config.hardware.max_pwl_segments = 8;
    let mut engine = engine(config);
    let err = engine.load_graph(graph).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuantizationError);
    assert!(err.to_string().contains("sig"));
    assert!(engine.context().handles().is_empty());
}

#[test]
fn test_saturating_16_bit_biases_rejected() {
    let (graph, _, _) = affine_10x10();
    let mut config = RuntimeConfig::default();
    config.precision.bias_bits = 16;
    let mut engine = engine(config);
    let err = engine.load_graph(graph).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuantizationError);
    assert!(err.to_string().contains("fc"));
    assert!(engine.context().handles().is_empty());
}

#[test]
fn test_hung_wait_times_out_and_poisons() {
    let fake = FakeAccelerator::default();
    let control = fake.control();
    let mut engine = fake_engine(fake);
    let (graph, _, _) = affine_10x10();
    let handle = engine.load_graph(graph.clone()).unwrap();
    let x = Tensor::zeros(Shape::nc(1, 10));

    control.set_hang(true);
    let err = engine.infer(handle, &[x.clone()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // The session stays unusable even once the device recovers.
    control.set_hang(false);
    let err = engine.infer(handle, &[x.clone()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert!(engine.context().is_poisoned());

    engine.reopen().unwrap();
    let handle = engine.load_graph(graph).unwrap();
    assert!(engine.infer(handle, &[x]).is_ok());
}

#[test]
fn test_query_state_stateless_is_empty() {
    let (graph, _, _) = affine_10x10();
    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(graph).unwrap();
    assert!(engine.query_state(handle).unwrap().is_empty());
}

#[test]
fn test_device_unavailable_at_open() {
    let fake = FakeAccelerator::default();
    fake.control().set_unavailable(true);
    let err = InferenceEngine::new(RuntimeConfig::default(), Box::new(fake))
        .open()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
}

// ── Properties ─────────────────────────────────────────────────

#[test]
fn test_aot_round_trip_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rnn.aot");
    let x = Tensor::from_vec(Shape::nc(1, 8), weights(8, 4)).unwrap();

    let mut compiled = engine(RuntimeConfig::default());
    let original = compiled.load_graph(recurrent(8)).unwrap();
    compiled.export(original, &path).unwrap();

    let mut loaded = engine(RuntimeConfig::default());
    let imported = loaded.load_aot(&path).unwrap();
    assert_eq!(loaded.model(imported).unwrap(), compiled.model(original).unwrap());

    // Two steps, so the recurrent state is exercised as well.
    for _ in 0..2 {
        let a = compiled.infer(original, &[x.clone()]).unwrap();
        let b = loaded.infer(imported, &[x.clone()]).unwrap();
        assert_eq!(a[0].as_f32_slice(), b[0].as_f32_slice());
    }
}

#[test]
fn test_state_isolation() {
    const N: usize = 3;
    let mut b = GraphBuilder::new("multi-state");
    let x = b.input("in", Shape::nc(1, 4));
    for i in 0..N {
        let s = b.state(format!("s{i}"), Shape::nc(1, 4));
        let read = b.memory_read(format!("read{i}"), s);
        let sum = b.eltwise(format!("sum{i}"), EltwiseOp::Sum, x, read);
        let act = b.activation(format!("relu{i}"), sum, ActivationFn::Relu);
        b.memory_write(format!("write{i}"), act, s);
        b.output(act);
    }
    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(b.finish().unwrap()).unwrap();

    let states = engine.query_state(handle).unwrap();
    let names: Vec<&str> = states.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["s0", "s1", "s2"]);

    let x = Tensor::from_vec(Shape::nc(1, 4), vec![0.5; 4]).unwrap();
    engine.infer(handle, &[x]).unwrap();
    engine.reset_state(&states[1]).unwrap();

    for (i, state) in states.iter().enumerate() {
        let value = engine.read_state(state).unwrap();
        let expected = if i == 1 { 0.0 } else { 0.5 };
        assert_close(value.as_f32_slice(), &[expected; 4], 0.01);
    }
}

#[test]
fn test_granted_size_contract() {
    let fake = FakeAccelerator::default();
    let control = fake.control();
    control.set_extra_grant(8192);
    let mut engine = fake_engine(fake);
    let handle = engine.load_graph(recurrent(8)).unwrap();

    let model = engine.model(handle).unwrap();
    let (requested, granted) = control
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Allocate { requested, granted } => Some((requested, granted)),
            _ => None,
        })
        .unwrap();
    let granted = granted.unwrap();
    assert_eq!(requested, model.arena_size);
    assert!(granted >= requested + 8192);
    assert!(model.regions.iter().all(|r| r.end() <= granted));

    let x = Tensor::from_vec(Shape::nc(1, 8), vec![0.25; 8]).unwrap();
    assert!(engine.infer(handle, &[x]).is_ok());
}

#[test]
fn test_alignment_pass_idempotent_after_pipeline() {
    let mut b = GraphBuilder::new("split");
    let x = b.input("in", Shape::nc(1, 128));
    let hi = b.crop("hi", x, 10, 118);
    let act = b.activation("hi_act", hi, ActivationFn::Relu);
    b.output(act);

    let config = RuntimeConfig::default();
    let ctx = config.transform_context();
    let (mut graph, report) = Pipeline::default().run(b.finish().unwrap(), &ctx).unwrap();
    assert!(report.total_inserted() >= 1);
    assert!(graph
        .iter_layers()
        .any(|l| l.origin == Origin::Synthetic(SyntheticKind::AlignmentCopy)));

    let layers = graph.layers().to_vec();
    let again = InsertAlignmentCopies::new().run(&mut graph, &ctx).unwrap();
    assert!(again.is_noop());
    assert_eq!(graph.layers(), layers.as_slice());
}

#[test]
fn test_misaligned_crop_runs() {
    let mut b = GraphBuilder::new("split");
    let x = b.input("in", Shape::nc(1, 128));
    let hi = b.crop("hi", x, 10, 118);
    let act = b.activation("hi_act", hi, ActivationFn::Relu);
    b.output(act);

    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(b.finish().unwrap()).unwrap();
    let input: Vec<f32> = (0..128).map(|i| (i as f32 - 64.0) / 8.0).collect();
    let expected: Vec<f32> = input[10..].iter().map(|v| v.max(0.0)).collect();
    let x = Tensor::from_vec(Shape::nc(1, 128), input).unwrap();
    let out = engine.infer(handle, &[x]).unwrap();
    assert_close(out[0].as_f32_slice(), &expected, 0.05);
}

#[test]
fn test_weight_round_trip_bound() {
    for weight_bits in [8u8, 16] {
        let mut b = GraphBuilder::new("blobs");
        let x = b.input("in", Shape::nc(1, 16));
        let fc1 = b.affine("fc1", x, 16, weights(256, 5), Some(weights(16, 6)));
        let act = b.activation("relu", fc1, ActivationFn::Relu);
        let diag = b.scale_shift("norm", act, weights(16, 7), Some(weights(16, 8)));
        b.output(diag);

        let mut config = RuntimeConfig::default();
        config.precision.weight_bits = weight_bits;
        let compilation = compile(b.finish().unwrap(), &config).unwrap();
        let bound = config.precision.weight_error_bound;
        for m in compilation.metrics.iter().filter(|m| m.weight_bits.is_some()) {
            assert_eq!(m.weight_bits, Some(weight_bits), "{}", m.layer);
            assert!(
                m.weight_max_error <= bound,
                "{}: error {} exceeds {}",
                m.layer,
                m.weight_max_error,
                bound
            );
        }
    }
}

// ── Networks ───────────────────────────────────────────────────

#[test]
fn test_conv_pool_network() {
    let (c, w, f, k) = (2, 16, 4, 3);
    let filters = weights(f * c * k, 9);
    let biases = weights(f, 10);
    let mut b = GraphBuilder::new("conv");
    let x = b.input("in", Shape::ncw(1, c, w));
    let conv = b.convolution("conv", x, f, k, 1, filters.clone(), Some(biases.clone()));
    let pool = b.pooling("pool", conv, PoolingKind::Max, 2, 2);
    b.output(pool);

    let input = weights(c * w, 11);
    let out_w = w - k + 1;
    let mut conv_ref = vec![0.0f32; f * out_w];
    for fi in 0..f {
        for o in 0..out_w {
            let mut acc = biases[fi];
            for ci in 0..c {
                for ki in 0..k {
                    acc += filters[(fi * c + ci) * k + ki] * input[ci * w + o + ki];
                }
            }
            conv_ref[fi * out_w + o] = acc;
        }
    }
    let pooled_w = out_w / 2;
    let expected: Vec<f32> = (0..f)
        .flat_map(|fi| {
            let row = &conv_ref[fi * out_w..(fi + 1) * out_w];
            (0..pooled_w).map(move |p| row[2 * p].max(row[2 * p + 1]))
        })
        .collect();

    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(b.finish().unwrap()).unwrap();
    let x = Tensor::from_vec(Shape::ncw(1, c, w), input).unwrap();
    let out = engine.infer(handle, &[x]).unwrap();
    assert_close(out[0].as_f32_slice(), &expected, 0.02);
}

#[test]
fn test_recurrent_network_carries_state() {
    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(recurrent(8)).unwrap();
    let input = weights(8, 12);
    let x = Tensor::from_vec(Shape::nc(1, 8), input.clone()).unwrap();

    let first: Vec<f32> = input.iter().map(|v| v.tanh()).collect();
    let second: Vec<f32> = input.iter().zip(&first).map(|(v, h)| (v + h).tanh()).collect();

    let out = engine.infer(handle, &[x.clone()]).unwrap();
    assert_close(out[0].as_f32_slice(), &first, 0.06);
    let out = engine.infer(handle, &[x.clone()]).unwrap();
    assert_close(out[0].as_f32_slice(), &second, 0.06);

    let state = engine.query_state(handle).unwrap().remove(0);
    engine.reset_state(&state).unwrap();
    let out = engine.infer(handle, &[x]).unwrap();
    assert_close(out[0].as_f32_slice(), &first, 0.06);
}

// ── Diagnostics ────────────────────────────────────────────────

#[test]
fn test_profiling_accumulates() {
    let (graph, _, _) = affine_10x10();
    let mut engine = engine(RuntimeConfig::default());
    let handle = engine.load_graph(graph).unwrap();

    let zeroed = engine.performance_counters(handle).unwrap();
    assert!(!zeroed.is_empty());
    assert!(zeroed.values().all(|r| r.invocations == 0));

    let x = Tensor::zeros(Shape::nc(1, 10));
    for _ in 0..3 {
        engine.infer(handle, &[x.clone()]).unwrap();
    }
    let counters = engine.performance_counters(handle).unwrap();
    assert!(counters["fc"].device_cycles > 0);
    assert!(counters.values().all(|r| r.invocations == 3));
    let total = engine.aggregate_counters(handle).unwrap().unwrap();
    assert_eq!(total.invocations, 3);
    assert_eq!(
        total.device_cycles,
        counters.values().map(|r| r.device_cycles).sum::<u64>()
    );
}

#[test]
fn test_dump_native_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        dump_path: Some(dir.path().join("dumps")),
        ..Default::default()
    };
    let (graph, _, _) = affine_10x10();
    let mut engine = engine(config);
    let handle = engine.load_graph(graph).unwrap();

    let bytes = engine.dump_native(handle).unwrap();
    assert!(bytes.starts_with(b"FXNATIVE"));
    let written = std::fs::read(dump_file(&dir.path().join("dumps"), "affine10")).unwrap();
    assert_eq!(written, bytes);
}

#[test]
fn test_close_and_reopen_engine() {
    let (graph, _, _) = affine_10x10();
    let mut engine = engine(RuntimeConfig::default());
    engine.load_graph(graph.clone()).unwrap();
    let idle = engine.close();

    let mut engine = idle.open().unwrap();
    assert!(engine.context().handles().is_empty());
    let handle = engine.load_graph(graph).unwrap();
    assert!(engine.infer(handle, &[Tensor::zeros(Shape::nc(1, 10))]).is_ok());
}
