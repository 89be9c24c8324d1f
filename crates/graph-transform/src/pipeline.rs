// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The ordered pass pipeline.

use crate::pass::alignment::InsertAlignmentCopies;
use crate::pass::diagonal::ScaleShiftToDiagonal;
use crate::pass::identity::InsertIdentityActivations;
use crate::pass::pwl::ApproximateActivations;
use crate::pass::topology::ValidateTopology;
use crate::pass::Pass;
use crate::{TransformContext, TransformError, TransformReport};
use model_ir::{CompileStage, Graph, Validated};

/// Runs passes in a fixed order and stamps the result as transformed.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for Pipeline {
    /// The standard order: validate, rewrite scale/shift, approximate
    /// activations, narrow accumulators, then fix alignment.
    fn default() -> Self {
        Self {
            passes: vec![
                Box::new(ValidateTopology::new()),
                Box::new(ScaleShiftToDiagonal::new()),
                Box::new(ApproximateActivations::new()),
                Box::new(InsertIdentityActivations::new()),
                Box::new(InsertAlignmentCopies::new()),
            ],
        }
    }
}

impl Pipeline {
    /// A pipeline running exactly `passes`, in order.
    pub fn with_passes(passes: Vec<Box<dyn Pass>>) -> Self {
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass. The first failure aborts and the partially
    /// rewritten graph is dropped.
    pub fn run(
        &self,
        mut graph: Graph<Validated>,
        ctx: &TransformContext,
    ) -> Result<(Graph<Validated>, TransformReport), TransformError> {
        if graph.stage() != CompileStage::Source {
            return Err(TransformError::InvalidGraphState(format!(
                "graph '{}' is already {}",
                graph.name,
                graph.stage()
            )));
        }

        let mut report = TransformReport::default();
        for pass in &self.passes {
            let pass_report = pass.run(&mut graph, ctx)?;
            tracing::debug!(
                pass = pass.name(),
                inserted = pass_report.inserted,
                rewritten = pass_report.rewritten,
                "pass complete"
            );
            report.passes.push(pass_report);
        }

        graph.set_stage(CompileStage::Transformed);
        tracing::info!("{}", report.summary());
        Ok((graph, report))
    }
}

/// Transforms `graph` with the standard pipeline.
pub fn transform(
    graph: Graph<Validated>,
    ctx: &TransformContext,
) -> Result<Graph<Validated>, TransformError> {
    Pipeline::default().run(graph, ctx).map(|(g, _)| g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{ActivationFn, GraphBuilder, LayerKind, SyntheticKind};
    use tensor_core::Shape;

    fn network() -> Graph<Validated> {
        let mut b = GraphBuilder::new("net");
        let x = b.input("in", Shape::nc(1, 40));
        let norm = b.scale_shift("norm", x, vec![0.5; 40], None);
        let fc = b.affine("fc", norm, 40, vec![0.01; 1600], Some(vec![0.0; 40]));
        let part = b.crop("part", fc, 3, 20);
        let act = b.activation("act", part, ActivationFn::Tanh);
        b.output(act);
        b.finish().unwrap()
    }

    #[test]
    fn test_default_order() {
        assert_eq!(
            Pipeline::default().pass_names(),
            vec![
                "validate-topology",
                "scale-shift-to-diagonal",
                "approximate-activations",
                "insert-identity-activations",
                "insert-alignment-copies",
            ]
        );
    }

    #[test]
    fn test_full_pipeline() {
        let (g, report) = Pipeline::default()
            .run(network(), &TransformContext::default())
            .unwrap();
        assert_eq!(g.stage(), CompileStage::Transformed);

        // No source-only kinds survive.
        assert!(g.iter_layers().all(|l| !l.kind.is_source_only()));
        assert_eq!(g.count_synthetic(SyntheticKind::Diagonal), 1);
        assert_eq!(g.count_synthetic(SyntheticKind::Pwl), 1);
        // The diagonal and the affine both feed narrow consumers.
        assert_eq!(g.count_synthetic(SyntheticKind::IdentityPwl), 2);
        // Crop at element 3 of an i16 buffer is misaligned.
        assert_eq!(g.count_synthetic(SyntheticKind::AlignmentCopy), 1);
        assert_eq!(report.total_inserted(), 3);

        // Nothing was dropped.
        assert_eq!(g.num_layers(), 5 + 3);
        let act = g.layer_by_name("act").unwrap();
        assert!(matches!(act.kind, LayerKind::Pwl { .. }));
    }

    #[test]
    fn test_rejects_transformed_graph() {
        let g = transform(network(), &TransformContext::default()).unwrap();
        assert!(matches!(
            transform(g, &TransformContext::default()),
            Err(TransformError::InvalidGraphState(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let ctx = TransformContext::default();
        let a = transform(network(), &ctx).unwrap();
        let b = transform(network(), &ctx).unwrap();
        assert_eq!(a.layers(), b.layers());
    }
}
