// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Identity activation insertion.
//!
//! Affine, diagonal, convolution and eltwise layers write 32-bit
//! accumulators. Only a PWL unit can narrow an accumulator back to the
//! activation precision, so every other consumer of such a layer is routed
//! through a synthetic identity PWL. All narrow consumers of one producer
//! share a single identity layer. Graph outputs may stay wide.

use crate::pass::pwl::identity_segments;
use crate::pass::Pass;
use crate::{PassReport, TransformContext, TransformError};
use model_ir::{ActivationFn, Graph, LayerId, LayerKind, SyntheticKind, Validated};

#[derive(Debug, Clone, Default)]
pub struct InsertIdentityActivations;

impl InsertIdentityActivations {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for InsertIdentityActivations {
    fn name(&self) -> &str {
        "insert-identity-activations"
    }

    fn run(
        &self,
        graph: &mut Graph<Validated>,
        _ctx: &TransformContext,
    ) -> Result<PassReport, TransformError> {
        let mut report = PassReport::new(self.name());

        let plan: Vec<(LayerId, String, Vec<LayerId>)> = graph
            .iter_layers()
            .filter(|l| l.kind.produces_accumulator())
            .filter_map(|producer| {
                let narrow: Vec<LayerId> = graph
                    .consumers(producer.id)
                    .into_iter()
                    .filter(|c| {
                        graph
                            .layer(*c)
                            .is_some_and(|l| !l.kind.accepts_accumulator())
                    })
                    .collect();
                (!narrow.is_empty()).then(|| (producer.id, producer.name.clone(), narrow))
            })
            .collect();

        for (producer, name, consumers) in plan {
            let kind = LayerKind::Pwl {
                function: ActivationFn::Identity,
                segments: identity_segments(),
            };
            let id = graph.insert_after(
                producer,
                &format!("{name}/identity"),
                kind,
                SyntheticKind::IdentityPwl,
                &consumers,
            );
            if id.is_some() {
                tracing::debug!(producer = %name, consumers = consumers.len(), "identity pwl inserted");
                report.inserted += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{EltwiseOp, Origin};
    use tensor_core::Shape;

    #[test]
    fn test_affine_into_eltwise_gets_identity() {
        let mut b = model_ir::GraphBuilder::new("res");
        let x = b.input("in", Shape::nc(1, 2));
        let fc = b.affine("fc", x, 2, vec![1.0, 0.0, 0.0, 1.0], None);
        let sum = b.eltwise("sum", EltwiseOp::Sum, fc, x);
        b.output(sum);
        b.output(fc);
        let mut g = b.finish().unwrap();

        let report = InsertIdentityActivations::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert_eq!(report.inserted, 1);

        let identity = g.layer_by_name("fc/identity").unwrap();
        assert_eq!(identity.origin, Origin::Synthetic(SyntheticKind::IdentityPwl));
        assert_eq!(g.layer(sum).unwrap().inputs, vec![identity.id, x]);
        // The wide output stays where it was.
        assert!(g.is_output(fc));
    }

    #[test]
    fn test_shared_identity_and_idempotent() {
        let mut b = model_ir::GraphBuilder::new("fan");
        let x = b.input("in", Shape::nc(1, 2));
        let fc = b.affine("fc", x, 2, vec![0.5; 4], None);
        let c1 = b.crop("lo", fc, 0, 1);
        let c2 = b.crop("hi", fc, 1, 1);
        b.output(c1);
        b.output(c2);
        let mut g = b.finish().unwrap();

        let pass = InsertIdentityActivations::new();
        let ctx = TransformContext::default();
        assert_eq!(pass.run(&mut g, &ctx).unwrap().inserted, 1);
        let identity = g.layer_by_name("fc/identity").unwrap().id;
        assert_eq!(g.consumers(identity), vec![c1, c2]);

        assert!(pass.run(&mut g, &ctx).unwrap().is_noop());
    }

    #[test]
    fn test_pwl_consumer_needs_nothing() {
        let mut b = model_ir::GraphBuilder::new("mlp");
        let x = b.input("in", Shape::nc(1, 2));
        let fc = b.affine("fc", x, 2, vec![0.5; 4], None);
        let act = b.activation("act", fc, ActivationFn::Relu);
        b.output(act);
        let mut g = b.finish().unwrap();
        let report = InsertIdentityActivations::new()
            .run(&mut g, &TransformContext::default())
            .unwrap();
        assert!(report.is_noop());
    }
}
