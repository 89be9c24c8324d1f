// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Alignment copy insertion.
//!
//! Crops are views into their producer's buffer, so a crop starting at an
//! element offset begins at a byte offset inside that buffer. Every buffer
//! the device allocates is aligned; a view is aligned only if its cumulative
//! byte offset is a multiple of `alignment_bytes`. Consumers of a misaligned
//! view read through a synthetic copy that materializes it at an aligned
//! address. Copies themselves may read unaligned data, and nested crops are
//! judged on their own cumulative offset, so a second run inserts nothing.

use crate::pass::Pass;
use crate::{PassReport, TransformContext, TransformError};
use model_ir::{output_dtype, Graph, LayerId, LayerKind, SyntheticKind, Validated};
use std::collections::HashMap;
use tensor_core::DType;

#[derive(Debug, Clone, Default)]
pub struct InsertAlignmentCopies;

impl InsertAlignmentCopies {
    pub fn new() -> Self {
        Self
    }
}

/// Byte offset of every layer's output inside the buffer that backs it,
/// together with the element type of that buffer.
pub fn view_offsets(graph: &Graph<Validated>, activation: DType) -> HashMap<LayerId, (usize, DType)> {
    let mut offsets: HashMap<LayerId, (usize, DType)> = HashMap::new();
    for layer in graph.iter_layers() {
        let entry = match &layer.kind {
            LayerKind::Crop { offset, .. } => {
                let (base, dtype) = layer
                    .inputs
                    .first()
                    .and_then(|p| offsets.get(p).copied())
                    .unwrap_or((0, activation));
                (base + offset * dtype.size_bytes(), dtype)
            }
            kind => (0, output_dtype(kind, activation)),
        };
        offsets.insert(layer.id, entry);
    }
    offsets
}

impl Pass for InsertAlignmentCopies {
    fn name(&self) -> &str {
        "insert-alignment-copies"
    }

    fn run(
        &self,
        graph: &mut Graph<Validated>,
        ctx: &TransformContext,
    ) -> Result<PassReport, TransformError> {
        let mut report = PassReport::new(self.name());
        let alignment = ctx.limits.alignment_bytes.max(1);
        let offsets = view_offsets(graph, ctx.activation_dtype);

        let mut plan: Vec<(LayerId, String, Vec<LayerId>)> = Vec::new();
        for layer in graph.iter_layers() {
            if !matches!(layer.kind, LayerKind::Crop { .. }) {
                continue;
            }
            let offset = offsets.get(&layer.id).map_or(0, |(o, _)| *o);
            if offset % alignment == 0 {
                continue;
            }
            let readers: Vec<LayerId> = graph
                .consumers(layer.id)
                .into_iter()
                .filter(|c| {
                    graph
                        .layer(*c)
                        .is_some_and(|l| !matches!(l.kind, LayerKind::Crop { .. } | LayerKind::Copy))
                })
                .collect();
            if !readers.is_empty() {
                tracing::debug!(layer = %layer.name, offset, alignment, "misaligned view");
                plan.push((layer.id, layer.name.clone(), readers));
            }
        }

        for (view, name, readers) in plan {
            if graph
                .insert_after(
                    view,
                    &format!("{name}/align"),
                    LayerKind::Copy,
                    SyntheticKind::AlignmentCopy,
                    &readers,
                )
                .is_some()
            {
                report.inserted += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{ActivationFn, GraphBuilder, Origin};
    use tensor_core::Shape;

    /// in[0..64] split into an aligned and a misaligned half, each feeding
    /// an activation.
    fn split_graph(split_at: usize) -> Graph<Validated> {
        let mut b = GraphBuilder::new("split");
        let x = b.input("in", Shape::nc(1, 128));
        let lo = b.crop("lo", x, 0, split_at);
        let hi = b.crop("hi", x, split_at, 128 - split_at);
        let a = b.activation("lo_act", lo, ActivationFn::Relu);
        let c = b.activation("hi_act", hi, ActivationFn::Relu);
        b.output(a);
        b.output(c);
        b.finish().unwrap()
    }

    #[test]
    fn test_misaligned_crop_gets_copy() {
        let mut g = split_graph(10);
        let report = InsertAlignmentCopies::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert_eq!(report.inserted, 1);

        let copy = g.layer_by_name("hi/align").unwrap();
        assert_eq!(copy.kind, LayerKind::Copy);
        assert_eq!(copy.origin, Origin::Synthetic(SyntheticKind::AlignmentCopy));
        assert_eq!(g.layer_by_name("hi_act").unwrap().inputs, vec![copy.id]);
        assert!(g.layer_by_name("lo/align").is_none());
    }

    #[test]
    fn test_aligned_crop_untouched() {
        // 32 i16 elements = 64 bytes.
        let mut g = split_graph(32);
        let report = InsertAlignmentCopies::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_idempotent() {
        let mut g = split_graph(10);
        let pass = InsertAlignmentCopies::new();
        let ctx = TransformContext::default();
        pass.run(&mut g, &ctx).unwrap();
        let once = g.layers().to_vec();
        let second = pass.run(&mut g, &ctx).unwrap();
        assert!(second.is_noop());
        assert_eq!(g.layers(), once.as_slice());
    }

    #[test]
    fn test_nested_crop_offsets_accumulate() {
        let mut b = GraphBuilder::new("nested");
        let x = b.input("in", Shape::nc(1, 128));
        let outer = b.crop("outer", x, 16, 64);
        let inner = b.crop("inner", outer, 16, 32);
        let act = b.activation("act", inner, ActivationFn::Relu);
        b.output(act);
        let g = b.finish().unwrap();

        let offsets = view_offsets(&g, DType::I16);
        assert_eq!(offsets[&outer], (32, DType::I16));
        assert_eq!(offsets[&inner], (64, DType::I16));

        // outer is misaligned but only feeds a crop; inner is aligned.
        let mut g = g;
        let report = InsertAlignmentCopies::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert!(report.is_noop());
    }
}
