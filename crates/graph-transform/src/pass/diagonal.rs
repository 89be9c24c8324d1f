// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scale/shift to diagonal affine rewriting.
//!
//! The accelerator has no element-wise scale instruction. A pure
//! `x * scale + shift` layer is the affine transform with `diag(scale)` as
//! weight matrix, which the device executes natively.

use crate::pass::Pass;
use crate::{PassReport, TransformContext, TransformError};
use model_ir::{Graph, LayerKind, Origin, SyntheticKind, Validated};

#[derive(Debug, Clone, Default)]
pub struct ScaleShiftToDiagonal;

impl ScaleShiftToDiagonal {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for ScaleShiftToDiagonal {
    fn name(&self) -> &str {
        "scale-shift-to-diagonal"
    }

    fn run(
        &self,
        graph: &mut Graph<Validated>,
        _ctx: &TransformContext,
    ) -> Result<PassReport, TransformError> {
        let mut report = PassReport::new(self.name());
        for layer in graph.layers_mut() {
            let diagonal = match &layer.kind {
                LayerKind::ScaleShift { scale, shift } => LayerKind::Diagonal {
                    weights: scale.clone(),
                    biases: shift.clone(),
                },
                _ => continue,
            };
            tracing::debug!(layer = %layer.name, "scale/shift -> diagonal");
            layer.kind = diagonal;
            layer.origin = Origin::Synthetic(SyntheticKind::Diagonal);
            report.rewritten += 1;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Blob, GraphBuilder};
    use tensor_core::Shape;

    #[test]
    fn test_rewrites_scale_shift() {
        let mut b = GraphBuilder::new("ss");
        let x = b.input("in", Shape::nc(1, 3));
        let s = b.scale_shift("norm", x, vec![2.0, 3.0, 4.0], Some(vec![1.0, 0.0, -1.0]));
        b.output(s);
        let mut g = b.finish().unwrap();

        let report = ScaleShiftToDiagonal::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert_eq!(report.rewritten, 1);

        let layer = g.layer(s).unwrap();
        assert_eq!(layer.origin, Origin::Synthetic(SyntheticKind::Diagonal));
        assert_eq!(
            layer.kind,
            LayerKind::Diagonal {
                weights: Blob::vector(vec![2.0, 3.0, 4.0]),
                biases: Some(Blob::vector(vec![1.0, 0.0, -1.0])),
            }
        );
        // Name and edges survive the rewrite.
        assert_eq!(layer.name, "norm");
        assert_eq!(layer.inputs, vec![x]);
    }

    #[test]
    fn test_noop_without_scale_shift() {
        let mut b = GraphBuilder::new("plain");
        let x = b.input("in", Shape::nc(1, 2));
        b.output(x);
        let mut g = b.finish().unwrap();
        let report = ScaleShiftToDiagonal::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert!(report.is_noop());
    }
}
