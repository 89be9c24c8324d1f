// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scale selection and layer quantization.
//!
//! Layers are visited in topological order. Each one receives a
//! [`LayerQuant`] derived from the scales of its producers:
//!
//! | Kind | Output | Scale |
//! |---|---|---|
//! | input | activation | `input_scale_factor` or `input_range / qmax` |
//! | affine, diagonal, convolution | i32 | `weight_scale * input_scale` |
//! | eltwise sum | i32 | common scale, integer input multipliers |
//! | eltwise prod | i32 | `scale_a * scale_b` |
//! | pwl | activation | from the function bounds or the propagated range |
//! | pooling, crop, copy | as input | as input |
//! | memory read / write | activation | state scale |
//!
//! Alongside the scale, a conservative bound on the real magnitude of every
//! layer output is propagated; it picks the output scale of unbounded PWL
//! layers such as identity and ReLU.

use crate::blob::{quantize_blob, quantize_with_scale};
use crate::config::qmax;
use crate::pwl::{fixed_error, output_range, to_fixed};
use crate::{PrecisionConfig, QuantizationMetric, QuantizeError};
use model_ir::{
    Blob, CompileStage, EltwiseOp, Graph, Layer, LayerId, LayerKind, LayerQuant, Origin, Rescale,
    SyntheticKind, Validated,
};
use std::collections::HashMap;
use tensor_core::DType;

/// Largest power of two the eltwise common scale is divided by.
const MAX_ELTWISE_REFINE: u32 = 1024;

/// Relative error allowed when an eltwise input scale is expressed as an
/// integer multiple of the common scale.
const ELTWISE_TOLERANCE: f64 = 1e-3;

/// Scale, element type and real magnitude bound of a layer output.
#[derive(Debug, Clone, Copy)]
struct TensorInfo {
    scale: f64,
    dtype: DType,
    range: f64,
}

enum Step {
    Quant(LayerQuant, f64, QuantizationMetric),
    /// A memory write whose producer must be rescaled first.
    Rescale { write: LayerId, producer: LayerId },
}

/// Converts a transformed graph to fixed point.
///
/// Returns the quantized graph (stage [`CompileStage::Quantized`]) and one
/// metric per layer, in layer order.
pub fn quantize(
    mut graph: Graph<Validated>,
    config: &PrecisionConfig,
) -> Result<(Graph<Validated>, Vec<QuantizationMetric>), QuantizeError> {
    config.validate()?;
    match graph.stage() {
        CompileStage::Transformed => {}
        stage => {
            return Err(QuantizeError::InvalidGraphState(format!(
                "graph '{}' must be transformed before quantization, found {}",
                graph.name, stage
            )))
        }
    }

    let ids: Vec<LayerId> = graph.iter_layers().map(|l| l.id).collect();
    let mut info: HashMap<LayerId, TensorInfo> = HashMap::new();
    let mut metrics: HashMap<LayerId, QuantizationMetric> = HashMap::new();
    let mut inserted = 0usize;

    for id in ids {
        let step = {
            let layer = graph
                .layer(id)
                .ok_or_else(|| QuantizeError::InvalidGraphState(format!("layer {id} vanished")))?;
            quantize_layer(layer, &info, config)?
        };

        match step {
            Step::Quant(quant, range, metric) => {
                record(&mut graph, &mut info, &mut metrics, id, quant, range, metric);
            }
            Step::Rescale { write, producer } => {
                let src = info.get(&producer).copied().ok_or_else(|| {
                    QuantizeError::InvalidGraphState(format!("producer {producer} not quantized"))
                })?;
                let state_scale = config.state_scale();
                let write_name = graph.layer(write).map(|l| l.name.clone()).unwrap_or_default();
                let copy = graph
                    .insert_after(
                        producer,
                        &format!("{write_name}/rescale"),
                        LayerKind::Copy,
                        SyntheticKind::RescaleCopy,
                        &[write],
                    )
                    .ok_or_else(|| {
                        QuantizeError::InvalidGraphState(format!("producer {producer} vanished"))
                    })?;
                inserted += 1;

                let rescale = Rescale::between(src.scale, state_scale);
                tracing::debug!(
                    layer = %write_name,
                    from = src.scale,
                    to = state_scale,
                    ratio = rescale.ratio(),
                    "inserted rescale copy"
                );
                let dtype = config.activation_dtype();
                let mut quant = LayerQuant::activation(state_scale, dtype);
                quant.rescale = Some(rescale);
                let copy_name = graph.layer(copy).map(|l| l.name.clone()).unwrap_or_default();
                let mut metric = QuantizationMetric::new(
                    &copy_name,
                    "copy",
                    Some(SyntheticKind::RescaleCopy.as_str()),
                );
                metric.output_scale = state_scale;
                metric.output_bits = config.activation_bits;
                record(&mut graph, &mut info, &mut metrics, copy, quant, src.range, metric);

                // The write now reads the rescaled copy.
                let write_layer = graph.layer(write).ok_or_else(|| {
                    QuantizeError::InvalidGraphState(format!("layer {write} vanished"))
                })?;
                match quantize_layer(write_layer, &info, config)? {
                    Step::Quant(quant, range, metric) => {
                        record(&mut graph, &mut info, &mut metrics, write, quant, range, metric);
                    }
                    Step::Rescale { .. } => {
                        return Err(QuantizeError::Quantization {
                            layer: write_name,
                            detail: "state scale unreachable by rescale".into(),
                        })
                    }
                }
            }
        }
    }

    let state_scale = config.state_scale();
    for state in graph.states_mut() {
        state.scale = Some(state_scale);
    }
    graph.set_stage(CompileStage::Quantized);

    let ordered: Vec<QuantizationMetric> = graph
        .iter_layers()
        .filter_map(|l| metrics.remove(&l.id))
        .collect();
    let saturated: usize = ordered.iter().map(|m| m.saturated).sum();
    tracing::info!(
        graph = %graph.name,
        layers = ordered.len(),
        rescale_copies = inserted,
        saturated,
        "quantization complete"
    );
    Ok((graph, ordered))
}

fn record(
    graph: &mut Graph<Validated>,
    info: &mut HashMap<LayerId, TensorInfo>,
    metrics: &mut HashMap<LayerId, QuantizationMetric>,
    id: LayerId,
    quant: LayerQuant,
    range: f64,
    metric: QuantizationMetric,
) {
    info.insert(
        id,
        TensorInfo {
            scale: quant.output_scale,
            dtype: quant.output_dtype,
            range,
        },
    );
    metrics.insert(id, metric);
    if let Some(layer) = graph.layer_mut(id) {
        layer.quant = Some(quant);
    }
}

fn quantize_layer(
    layer: &Layer,
    info: &HashMap<LayerId, TensorInfo>,
    config: &PrecisionConfig,
) -> Result<Step, QuantizeError> {
    let act = config.activation_dtype();
    let act_qmax = qmax(config.activation_bits);
    let inputs: Vec<TensorInfo> = layer
        .inputs
        .iter()
        .map(|p| {
            info.get(p).copied().ok_or_else(|| {
                QuantizeError::InvalidGraphState(format!(
                    "layer '{}' reads {} before it is quantized",
                    layer.name, p
                ))
            })
        })
        .collect::<Result<_, _>>()?;

    if !layer.kind.accepts_accumulator() && inputs.iter().any(|i| i.dtype == DType::I32) {
        return Err(QuantizeError::InvalidGraphState(format!(
            "layer '{}' ({}) reads a 32-bit accumulator",
            layer.name, layer.kind
        )));
    }

    let synthetic = match layer.origin {
        Origin::Synthetic(kind) => Some(kind.as_str()),
        Origin::Source => None,
    };
    let mut metric = QuantizationMetric::new(&layer.name, layer.kind.as_str(), synthetic);
    let input = inputs.first().copied();

    let (quant, range) = match &layer.kind {
        LayerKind::Activation { .. } | LayerKind::ScaleShift { .. } => {
            return Err(QuantizeError::InvalidGraphState(format!(
                "layer '{}' of kind {} must be transformed first",
                layer.name, layer.kind
            )))
        }

        LayerKind::Input => {
            let scale = config.input_scale();
            (LayerQuant::activation(scale, act), scale * act_qmax)
        }

        LayerKind::Affine { weights, biases } => {
            let input = require(layer, input)?;
            let rows = layer.output_shape.num_elements().max(1);
            weighted(layer, weights, biases.as_ref(), rows, input, config, &mut metric)?
        }

        LayerKind::Diagonal { weights, biases } => {
            let input = require(layer, input)?;
            weighted(layer, weights, biases.as_ref(), weights.len(), input, config, &mut metric)?
        }

        LayerKind::Convolution { filters, biases, .. } => {
            let input = require(layer, input)?;
            let rows = layer.output_shape.channels().max(1);
            weighted(layer, filters, biases.as_ref(), rows, input, config, &mut metric)?
        }

        LayerKind::Eltwise { op } => {
            let (a, b) = match inputs.as_slice() {
                [a, b] => (*a, *b),
                _ => {
                    return Err(QuantizeError::InvalidGraphState(format!(
                        "eltwise '{}' needs two inputs",
                        layer.name
                    )))
                }
            };
            match op {
                EltwiseOp::Sum => {
                    let (scale, multipliers) = common_scale(&layer.name, a.scale, b.scale)?;
                    let mut quant = LayerQuant::activation(scale, DType::I32);
                    quant.input_multipliers = multipliers;
                    (quant, a.range + b.range)
                }
                EltwiseOp::Prod => (
                    LayerQuant::activation(a.scale * b.scale, DType::I32),
                    a.range * b.range,
                ),
            }
        }

        LayerKind::Pwl { function, segments } => {
            let input = require(layer, input)?;
            let range = match function.output_bounds() {
                Some((lo, hi)) => lo.abs().max(hi.abs()),
                None => output_range(segments, input.range),
            };
            let scale = if range > 0.0 { range / act_qmax } else { 1.0 / act_qmax };
            let fixed = to_fixed(segments, input.scale, scale, act);

            let lo = -input.range;
            let hi = input.range;
            let err = fixed_error(function, &fixed, input.scale, scale, act, lo, hi);
            // One output step on top of the fitted bound.
            let tolerance = config.pwl_max_error_percent / 100.0 * (2.0 * range).max(f64::EPSILON)
                + scale;
            if err > tolerance {
                return Err(QuantizeError::Quantization {
                    layer: layer.name.clone(),
                    detail: format!(
                        "fixed-point PWL error {err:.3e} exceeds {tolerance:.3e} \
                         at input scale {:.3e}",
                        input.scale
                    ),
                });
            }
            metric.pwl_segments = fixed.len();
            metric.pwl_max_error = err;

            let mut quant = LayerQuant::activation(scale, act);
            quant.pwl = fixed;
            (quant, range)
        }

        LayerKind::Pooling { .. } | LayerKind::Crop { .. } | LayerKind::Copy => {
            let input = require(layer, input)?;
            (LayerQuant::activation(input.scale, input.dtype), input.range)
        }

        LayerKind::MemoryRead { .. } => {
            let scale = config.state_scale();
            (LayerQuant::activation(scale, act), scale * act_qmax)
        }

        LayerKind::MemoryWrite { .. } => {
            let input = require(layer, input)?;
            let state_scale = config.state_scale();
            if !same_scale(input.scale, state_scale) {
                if let Some(producer) = layer.inputs.first() {
                    return Ok(Step::Rescale {
                        write: layer.id,
                        producer: *producer,
                    });
                }
            }
            (LayerQuant::activation(state_scale, act), input.range)
        }
    };

    metric.output_scale = quant.output_scale;
    metric.output_bits = (quant.output_dtype.size_bytes() * 8) as u8;
    Ok(Step::Quant(quant, range, metric))
}

fn require(layer: &Layer, input: Option<TensorInfo>) -> Result<TensorInfo, QuantizeError> {
    input.ok_or_else(|| {
        QuantizeError::InvalidGraphState(format!("layer '{}' has no input", layer.name))
    })
}

fn same_scale(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

/// Quantizes the weights and biases of an accumulating layer. `rows` is
/// the number of output channels the weights are split across.
fn weighted(
    layer: &Layer,
    weights: &Blob,
    biases: Option<&Blob>,
    rows: usize,
    input: TensorInfo,
    config: &PrecisionConfig,
    metric: &mut QuantizationMetric,
) -> Result<(LayerQuant, f64), QuantizeError> {
    let w = quantize_blob(&weights.values, config.weight_bits, config.saturation_percentile);
    if w.max_abs_error > config.weight_error_bound {
        return Err(QuantizeError::Quantization {
            layer: layer.name.clone(),
            detail: format!(
                "weight error {:.3e} exceeds bound {:.3e} at {} bits",
                w.max_abs_error, config.weight_error_bound, config.weight_bits
            ),
        });
    }

    // Biases live at the accumulator scale and must not clip.
    let acc_scale = w.scale * input.scale;
    let b = biases.map(|b| quantize_with_scale(&b.values, acc_scale, config.bias_bits));
    if let Some(b) = &b {
        if b.saturated > 0 || b.max_abs_error > config.weight_error_bound {
            return Err(QuantizeError::Quantization {
                layer: layer.name.clone(),
                detail: format!(
                    "{} of {} biases saturate {} bits at accumulator scale {:.3e} \
                     (error {:.3e})",
                    b.saturated, b.len, config.bias_bits, acc_scale, b.max_abs_error
                ),
            });
        }
    }

    // Conservative magnitude bound per output row.
    let row_len = (weights.len() / rows.max(1)).max(1);
    let range = weights
        .values
        .chunks(row_len)
        .enumerate()
        .map(|(i, row)| {
            let dot: f64 = row.iter().map(|v| (*v as f64).abs()).sum::<f64>() * input.range;
            let bias = biases
                .and_then(|b| b.values.get(i))
                .map_or(0.0, |v| (*v as f64).abs());
            dot + bias
        })
        .fold(0.0, f64::max);

    if range / acc_scale > i32::MAX as f64 {
        tracing::warn!(
            layer = %layer.name,
            range,
            scale = acc_scale,
            "accumulator range may overflow 32 bits"
        );
    }

    if w.saturated > 0 {
        tracing::warn!(
            layer = %layer.name,
            saturated = w.saturated,
            percentile = config.saturation_percentile,
            "weights clipped at the saturation percentile"
        );
    }
    metric.weight_bits = Some(w.bits);
    metric.weight_max_error = w.max_abs_error;
    metric.saturated = w.saturated;

    let mut quant = LayerQuant::activation(acc_scale, DType::I32);
    quant.weights = Some(w);
    quant.biases = b;
    Ok((quant, range))
}

/// Finds a common scale `s` such that both input scales are integer
/// multiples of it, returning `s` and the two multipliers.
fn common_scale(layer: &str, a: f64, b: f64) -> Result<(f64, Vec<i32>), QuantizeError> {
    let base = a.min(b);
    let mut k = 1u32;
    while k <= MAX_ELTWISE_REFINE {
        let scale = base / k as f64;
        let ma = a / scale;
        let mb = b / scale;
        let fits = |m: f64| {
            let r = m.round();
            r >= 1.0 && r <= i16::MAX as f64 && (m - r).abs() <= ELTWISE_TOLERANCE * m
        };
        if fits(ma) && fits(mb) {
            return Ok((scale, vec![ma.round() as i32, mb.round() as i32]));
        }
        k *= 2;
    }
    Err(QuantizeError::Quantization {
        layer: layer.to_string(),
        detail: format!("input scales {a:.3e} and {b:.3e} have no common integer multiple"),
    })
}
