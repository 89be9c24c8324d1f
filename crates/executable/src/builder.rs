// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Lays out a quantized graph in device memory and emits its instructions.

use crate::model::{
    ExecutableModel, Instruction, MemoryRegion, Operation, RegionKind, ScaleEntry,
    StateDescriptor, TensorDescriptor, TensorRef,
};
use crate::BuildError;
use graph_transform::HardwareLimits;
use model_ir::{
    CompileStage, Graph, Layer, LayerId, LayerKind, LayerQuant, QuantizedBlob, StateId, Validated,
};
use std::collections::HashMap;
use tensor_core::DType;

/// Assigns aligned regions in one arena.
struct Layout<'a> {
    limits: &'a HardwareLimits,
    regions: Vec<MemoryRegion>,
    cursor: u64,
}

impl<'a> Layout<'a> {
    fn new(limits: &'a HardwareLimits) -> Self {
        Self {
            limits,
            regions: Vec::new(),
            cursor: 0,
        }
    }

    fn push(&mut self, name: String, kind: RegionKind, size: u64, dtype: DType) -> u32 {
        let id = self.regions.len() as u32;
        let offset = self.limits.align(self.cursor as usize) as u64;
        self.regions.push(MemoryRegion {
            id,
            name,
            kind,
            offset,
            size,
            dtype,
        });
        self.cursor = offset + size;
        id
    }

    fn arena_size(&self) -> u64 {
        let end = self.limits.align(self.cursor as usize);
        self.limits.granular(end.max(1)) as u64
    }
}

/// Builds the executable form of a quantized graph.
///
/// Region order is parameters, inputs, states, then one region per
/// activation or accumulator. Crops do not get a region: they become views
/// into their producer's region. State reads are emitted first so that a
/// write later in the same inference does not clobber the value read.
pub fn build(graph: &Graph<Validated>, limits: &HardwareLimits) -> Result<ExecutableModel, BuildError> {
    if graph.stage() != CompileStage::Quantized {
        return Err(BuildError::InvalidGraphState(format!(
            "graph '{}' is {}, expected quantized",
            graph.name,
            graph.stage()
        )));
    }
    for layer in graph.iter_layers() {
        if layer.kind.is_source_only() {
            return Err(BuildError::InvalidGraphState(format!(
                "layer '{}' of kind {} was never transformed",
                layer.name, layer.kind
            )));
        }
        if layer.quant.is_none() {
            return Err(BuildError::InvalidGraphState(format!(
                "layer '{}' has no quantization",
                layer.name
            )));
        }
    }

    let mut layout = Layout::new(limits);
    let mut parameters: Vec<u8> = Vec::new();

    // ── Parameters ─────────────────────────────────────────────────
    let mut weight_refs: HashMap<LayerId, (TensorRef, Option<TensorRef>)> = HashMap::new();
    for layer in graph.iter_layers() {
        let q = quant(layer)?;
        let Some(w) = &q.weights else { continue };
        let w_ref = place_blob(&mut layout, &mut parameters, format!("{}/weights", layer.name), RegionKind::Weights, w);
        let b_ref = q
            .biases
            .as_ref()
            .map(|b| place_blob(&mut layout, &mut parameters, format!("{}/biases", layer.name), RegionKind::Biases, b));
        weight_refs.insert(layer.id, (w_ref, b_ref));
    }

    // ── Inputs ─────────────────────────────────────────────────────
    let mut refs: HashMap<LayerId, TensorRef> = HashMap::new();
    let mut inputs = Vec::new();
    for layer in graph.input_layers() {
        let q = quant(layer)?;
        let len = layer.output_shape.num_elements() as u64;
        let id = layout.push(
            layer.name.clone(),
            RegionKind::Input,
            len * q.output_dtype.size_bytes() as u64,
            q.output_dtype,
        );
        let tensor = TensorRef::whole(id, len);
        refs.insert(layer.id, tensor);
        inputs.push(TensorDescriptor {
            name: layer.name.clone(),
            shape: layer.output_shape.clone(),
            dtype: q.output_dtype,
            scale: q.output_scale,
            tensor,
        });
    }

    // ── States ─────────────────────────────────────────────────────
    let mut state_regions: HashMap<StateId, TensorRef> = HashMap::new();
    let mut states = Vec::new();
    for decl in graph.states() {
        let dtype = state_dtype(graph, decl.id).unwrap_or(DType::I16);
        let scale = decl.scale.ok_or_else(|| {
            BuildError::InvalidGraphState(format!("state '{}' has no scale", decl.name))
        })?;
        let len = decl.shape.num_elements() as u64;
        let id = layout.push(
            decl.name.clone(),
            RegionKind::State,
            len * dtype.size_bytes() as u64,
            dtype,
        );
        state_regions.insert(decl.id, TensorRef::whole(id, len));
        states.push(StateDescriptor {
            name: decl.name.clone(),
            shape: decl.shape.clone(),
            dtype,
            scale,
            region: id,
        });
    }

    // ── Activations ────────────────────────────────────────────────
    for layer in graph.iter_layers() {
        let q = quant(layer)?;
        let len = layer.output_shape.num_elements() as u64;
        let tensor = match &layer.kind {
            LayerKind::Input => continue,
            LayerKind::Crop { offset, len: crop_len } => {
                let base = producer_ref(layer, 0, &refs)?;
                let elem = q.output_dtype.size_bytes() as u64;
                if (*offset + *crop_len) as u64 > base.len {
                    return Err(BuildError::Layout {
                        layer: layer.name.clone(),
                        detail: format!(
                            "crop [{}, {}) exceeds producer of {} elements",
                            offset,
                            offset + crop_len,
                            base.len
                        ),
                    });
                }
                TensorRef {
                    region: base.region,
                    offset: base.offset + *offset as u64 * elem,
                    len: *crop_len as u64,
                }
            }
            LayerKind::MemoryWrite { state } => *state_regions.get(state).ok_or_else(|| {
                BuildError::InvalidGraphState(format!("layer '{}' writes an undeclared state", layer.name))
            })?,
            _ => {
                let kind = if q.output_dtype == DType::I32 {
                    RegionKind::Accumulator
                } else {
                    RegionKind::Activation
                };
                let id = layout.push(
                    layer.name.clone(),
                    kind,
                    len * q.output_dtype.size_bytes() as u64,
                    q.output_dtype,
                );
                TensorRef::whole(id, len)
            }
        };
        refs.insert(layer.id, tensor);
    }

    // ── Instructions ───────────────────────────────────────────────
    let mut instructions = Vec::with_capacity(graph.num_layers());
    for layer in graph.iter_layers() {
        if let LayerKind::MemoryRead { state } = &layer.kind {
            let src = state_regions.get(state).copied().ok_or_else(|| {
                BuildError::InvalidGraphState(format!("layer '{}' reads an undeclared state", layer.name))
            })?;
            instructions.push(Instruction {
                layer: layer.name.clone(),
                origin: layer.origin,
                op: Operation::Copy {
                    input: src,
                    output: producer_tensor(layer, &refs)?,
                    rescale: None,
                },
            });
        }
    }
    for layer in graph.iter_layers() {
        if let Some(op) = lower(layer, &refs, &weight_refs)? {
            instructions.push(Instruction {
                layer: layer.name.clone(),
                origin: layer.origin,
                op,
            });
        }
    }

    let outputs = graph
        .outputs()
        .iter()
        .filter_map(|id| graph.layer(*id))
        .map(|layer| {
            let q = quant(layer)?;
            Ok(TensorDescriptor {
                name: layer.name.clone(),
                shape: layer.output_shape.clone(),
                dtype: q.output_dtype,
                scale: q.output_scale,
                tensor: producer_tensor(layer, &refs)?,
            })
        })
        .collect::<Result<Vec<_>, BuildError>>()?;

    let scales = graph
        .iter_layers()
        .filter_map(|l| {
            l.quant.as_ref().map(|q| ScaleEntry {
                layer: l.name.clone(),
                scale: q.output_scale,
                dtype: q.output_dtype,
            })
        })
        .collect();

    let model = ExecutableModel {
        name: graph.name.clone(),
        arena_size: layout.arena_size(),
        regions: layout.regions,
        parameters,
        instructions,
        inputs,
        outputs,
        states,
        scales,
    };
    model.check_layout().map_err(|detail| BuildError::Layout {
        layer: graph.name.clone(),
        detail,
    })?;

    tracing::info!("{}", model.summary());
    Ok(model)
}

fn quant(layer: &Layer) -> Result<&LayerQuant, BuildError> {
    layer.quant.as_ref().ok_or_else(|| {
        BuildError::InvalidGraphState(format!("layer '{}' has no quantization", layer.name))
    })
}

fn state_dtype(graph: &Graph<Validated>, state: StateId) -> Option<DType> {
    graph.iter_layers().find_map(|l| match l.kind {
        LayerKind::MemoryRead { state: s } | LayerKind::MemoryWrite { state: s } if s == state => {
            l.quant.as_ref().map(|q| q.output_dtype)
        }
        _ => None,
    })
}

/// Places a parameter blob and appends it, aligned, to the image.
fn place_blob(
    layout: &mut Layout<'_>,
    image: &mut Vec<u8>,
    name: String,
    kind: RegionKind,
    blob: &QuantizedBlob,
) -> TensorRef {
    let id = layout.push(name, kind, blob.size_bytes() as u64, blob.dtype);
    let offset = layout.regions[id as usize].offset as usize;
    image.resize(offset, 0);
    image.extend_from_slice(&blob.data);
    TensorRef::whole(id, blob.len as u64)
}

fn producer_ref(layer: &Layer, operand: usize, refs: &HashMap<LayerId, TensorRef>) -> Result<TensorRef, BuildError> {
    layer
        .inputs
        .get(operand)
        .and_then(|p| refs.get(p))
        .copied()
        .ok_or_else(|| BuildError::Layout {
            layer: layer.name.clone(),
            detail: format!("operand {operand} is not laid out"),
        })
}

fn producer_tensor(layer: &Layer, refs: &HashMap<LayerId, TensorRef>) -> Result<TensorRef, BuildError> {
    refs.get(&layer.id).copied().ok_or_else(|| BuildError::Layout {
        layer: layer.name.clone(),
        detail: "output is not laid out".into(),
    })
}

/// Translates one layer into a device operation. Inputs, crops and state
/// reads produce none here.
fn lower(
    layer: &Layer,
    refs: &HashMap<LayerId, TensorRef>,
    weight_refs: &HashMap<LayerId, (TensorRef, Option<TensorRef>)>,
) -> Result<Option<Operation>, BuildError> {
    let q = quant(layer)?;
    let output = producer_tensor(layer, refs)?;
    let weights = || {
        weight_refs.get(&layer.id).copied().ok_or_else(|| BuildError::Layout {
            layer: layer.name.clone(),
            detail: "missing quantized weights".into(),
        })
    };
    let layout_err = |detail: String| BuildError::Layout {
        layer: layer.name.clone(),
        detail,
    };

    let op = match &layer.kind {
        LayerKind::Input | LayerKind::Crop { .. } | LayerKind::MemoryRead { .. } => return Ok(None),
        LayerKind::Activation { .. } | LayerKind::ScaleShift { .. } => {
            return Err(BuildError::InvalidGraphState(format!(
                "layer '{}' of kind {} was never transformed",
                layer.name, layer.kind
            )))
        }

        LayerKind::Affine { .. } => {
            let input = producer_ref(layer, 0, refs)?;
            let (w, b) = weights()?;
            if w.len != input.len * output.len {
                return Err(layout_err(format!(
                    "{} weights for {}x{} affine",
                    w.len, output.len, input.len
                )));
            }
            Operation::Affine {
                input,
                weights: w,
                biases: b,
                output,
                rows: output.len as u32,
                cols: input.len as u32,
            }
        }

        LayerKind::Diagonal { .. } => {
            let input = producer_ref(layer, 0, refs)?;
            let (w, b) = weights()?;
            if w.len != output.len || input.len != output.len {
                return Err(layout_err("diagonal sizes disagree".into()));
            }
            Operation::Diagonal {
                input,
                weights: w,
                biases: b,
                output,
            }
        }

        LayerKind::Convolution {
            in_channels,
            kernel,
            stride,
            ..
        } => {
            let input = producer_ref(layer, 0, refs)?;
            let (filters, biases) = weights()?;
            let in_channels = (*in_channels).max(1) as u64;
            let per_filter = in_channels * *kernel as u64;
            let num_filters = filters.len / per_filter.max(1);
            Operation::Convolution {
                input,
                filters,
                biases,
                output,
                in_channels: in_channels as u32,
                width: (input.len / in_channels) as u32,
                num_filters: num_filters as u32,
                kernel: *kernel as u32,
                stride: *stride as u32,
            }
        }

        LayerKind::Pooling {
            kind,
            window,
            stride,
            channels,
        } => {
            let input = producer_ref(layer, 0, refs)?;
            let channels = (*channels).max(1) as u64;
            Operation::Pooling {
                input,
                output,
                kind: *kind,
                channels: channels as u32,
                width: (input.len / channels) as u32,
                window: *window as u32,
                stride: *stride as u32,
            }
        }

        LayerKind::Eltwise { op } => Operation::Eltwise {
            op: *op,
            a: producer_ref(layer, 0, refs)?,
            b: producer_ref(layer, 1, refs)?,
            output,
            multipliers: q.input_multipliers.clone(),
        },

        LayerKind::Pwl { .. } => {
            if q.pwl.is_empty() {
                return Err(layout_err("PWL layer has no fixed-point segments".into()));
            }
            Operation::Pwl {
                input: producer_ref(layer, 0, refs)?,
                output,
                segments: q.pwl.clone(),
            }
        }

        LayerKind::Copy | LayerKind::MemoryWrite { .. } => {
            let input = producer_ref(layer, 0, refs)?;
            if input.len != output.len {
                return Err(layout_err(format!(
                    "copies {} elements into {}",
                    input.len, output.len
                )));
            }
            Operation::Copy {
                input,
                output,
                rescale: q.rescale,
            }
        }
    };

    tracing::trace!(layer = %layer.name, op = op.as_str(), "lowered");
    Ok(Some(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_transform::{transform, TransformContext};
    use model_ir::{ActivationFn, EltwiseOp, GraphBuilder};
    use quantizer::{quantize, PrecisionConfig};
    use tensor_core::Shape;

    fn compile(graph: Graph<Validated>) -> Graph<Validated> {
        let g = transform(graph, &TransformContext::default()).unwrap();
        quantize(g, &PrecisionConfig::default()).unwrap().0
    }

    fn mlp() -> Graph<Validated> {
        let mut b = GraphBuilder::new("mlp");
        let x = b.input("in", Shape::nc(1, 10));
        let fc1 = b.affine("fc1", x, 16, vec![0.02; 160], Some(vec![0.1; 16]));
        let act = b.activation("act", fc1, ActivationFn::Tanh);
        let part = b.crop("part", act, 3, 8);
        let fc2 = b.affine("fc2", part, 4, vec![0.05; 32], None);
        b.output(fc2);
        b.finish().unwrap()
    }

    #[test]
    fn test_requires_quantized_graph() {
        let g = transform(mlp(), &TransformContext::default()).unwrap();
        assert!(matches!(
            build(&g, &HardwareLimits::default()),
            Err(BuildError::InvalidGraphState(_))
        ));
    }

    #[test]
    fn test_layout_order_and_alignment() {
        let limits = HardwareLimits::default();
        let model = build(&compile(mlp()), &limits).unwrap();

        let kinds: Vec<RegionKind> = model.regions.iter().map(|r| r.kind).collect();
        let first_non_param = kinds.iter().position(|k| !k.is_parameter()).unwrap();
        assert!(kinds[..first_non_param].iter().all(|k| k.is_parameter()));
        assert_eq!(kinds[first_non_param], RegionKind::Input);

        for r in &model.regions {
            assert_eq!(r.offset % limits.alignment_bytes as u64, 0, "region {}", r.name);
        }
        assert_eq!(model.arena_size % limits.allocation_granularity as u64, 0);
        assert!(model.regions.iter().all(|r| r.end() <= model.arena_size));
        assert_eq!(model.parameters.len() as u64, model.regions[first_non_param - 1].end());
    }

    #[test]
    fn test_crop_is_view() {
        let model = build(&compile(mlp()), &HardwareLimits::default()).unwrap();
        assert!(model.regions.iter().all(|r| r.name != "part"));
        assert!(model.instructions.iter().all(|i| i.layer != "part"));

        // The alignment copy reads the view at a byte offset.
        let copy = model
            .instructions
            .iter()
            .find(|i| i.layer == "part/align")
            .unwrap();
        match &copy.op {
            Operation::Copy { input, .. } => {
                assert_eq!(input.offset, 3 * 2);
                assert_eq!(input.len, 8);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_descriptors() {
        let model = build(&compile(mlp()), &HardwareLimits::default()).unwrap();
        assert_eq!(model.inputs.len(), 1);
        assert_eq!(model.inputs[0].dtype, DType::I16);
        assert_eq!(model.outputs.len(), 1);
        // The graph output stays wide.
        assert_eq!(model.outputs[0].dtype, DType::I32);
        assert_eq!(model.outputs[0].tensor.len, 4);
        assert!(model.scale_of("fc1").is_some());
        assert_eq!(model.scales.len(), model.instructions.len() + 2);
    }

    #[test]
    fn test_state_reads_first() {
        let mut b = GraphBuilder::new("rnn");
        let h = b.state("h", Shape::nc(1, 8));
        let x = b.input("in", Shape::nc(1, 8));
        let prev = b.memory_read("h_read", h);
        let sum = b.eltwise("sum", EltwiseOp::Sum, x, prev);
        let act = b.activation("act", sum, ActivationFn::Tanh);
        b.memory_write("h_write", act, h);
        b.output(act);
        let model = build(&compile(b.finish().unwrap()), &HardwareLimits::default()).unwrap();

        assert_eq!(model.states.len(), 1);
        let state_region = model.states[0].region;
        assert_eq!(model.instructions[0].layer, "h_read");
        match &model.instructions[0].op {
            Operation::Copy { input, .. } => assert_eq!(input.region, state_region),
            other => panic!("unexpected op {other:?}"),
        }
        let write = model.instructions.iter().find(|i| i.layer == "h_write").unwrap();
        assert_eq!(write.op.output().region, state_region);
    }
}
