// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network graph: layers in topological order plus named recurrent state.
//!
//! # Type-State Pattern
//!
//! Structural validity is enforced at compile time:
//!
//! ```text
//! Graph<Loaded>     — layers assembled, not yet checked.
//!       │  .validate()
//!       ▼
//! Graph<Validated>  — edges, arities and parameter sizes verified.
//! ```
//!
//! Only a validated graph exposes the mutation API used by transformation
//! passes and the quantizer. How far compilation has progressed is tracked
//! separately at run time by [`CompileStage`], because the model builder must
//! reject graphs that skipped a stage with an error rather than a type error
//! (graphs can be handed in from outside the pipeline).
//!
//! # Recurrent state
//!
//! A memory layer's dependency on its own previous output is not an edge.
//! It is a named [`StateDecl`] written by exactly one `MemoryWrite` layer and
//! read by any number of `MemoryRead` layers, which keeps the graph acyclic.

use crate::{Layer, LayerId, LayerKind, ModelError, Origin, StateId, SyntheticKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tensor_core::Shape;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been assembled but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and may be transformed.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone + private::Sealed {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Loaded {}
    impl Sealed for super::Validated {}
}

/// How far a graph has progressed through compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStage {
    /// As produced by the graph loader.
    Source,
    /// All transformation passes have run.
    Transformed,
    /// Every layer carries fixed-point parameters.
    Quantized,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Transformed => "transformed",
            Self::Quantized => "quantized",
        })
    }
}

/// A named persistent buffer carried between inference calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDecl {
    pub id: StateId,
    pub name: String,
    pub shape: Shape,
    /// Fixed-point scale of the stored values, chosen by the quantizer.
    #[serde(default)]
    pub scale: Option<f64>,
}

// ── Graph ──────────────────────────────────────────────────────────

/// A network as an ordered list of layers.
#[derive(Debug, Clone)]
pub struct Graph<S: GraphState = Loaded> {
    /// Human-readable network name.
    pub name: String,
    layers: Vec<Layer>,
    states: Vec<StateDecl>,
    outputs: Vec<LayerId>,
    stage: CompileStage,
    next_id: u32,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl Graph<Loaded> {
    /// Creates a graph in the `Loaded` state.
    ///
    /// `layers` must already be in topological order; [`Graph::validate`]
    /// checks it.
    pub fn new(
        name: String,
        layers: Vec<Layer>,
        states: Vec<StateDecl>,
        outputs: Vec<LayerId>,
    ) -> Self {
        let next_id = layers.iter().map(|l| l.id.0 + 1).max().unwrap_or(0);
        Self {
            name,
            layers,
            states,
            outputs,
            stage: CompileStage::Source,
            next_id,
            _state: std::marker::PhantomData,
        }
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph is non-empty and names and ids are unique.
    /// - Every input edge points to a layer defined earlier (topological
    ///   order, hence acyclic).
    /// - Each layer has the number of inputs its kind requires.
    /// - No layer has a zero-element output.
    /// - Parameter blob sizes and edge element counts agree.
    /// - Every declared state is written by exactly one `MemoryWrite`.
    pub fn validate(self) -> Result<Graph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::Topology("graph contains no layers".into()));
        }

        let mut seen_ids = HashSet::new();
        let mut seen_names = HashSet::new();
        for layer in &self.layers {
            if !seen_ids.insert(layer.id) {
                return Err(ModelError::Topology(format!(
                    "duplicate layer id {}",
                    layer.id
                )));
            }
            if !seen_names.insert(layer.name.as_str()) {
                return Err(invalid(layer, "duplicate layer name"));
            }
        }

        let mut defined = HashSet::new();
        for layer in &self.layers {
            for input in &layer.inputs {
                if !defined.contains(input) {
                    return Err(ModelError::Topology(format!(
                        "layer '{}' reads from {} which is not defined before it",
                        layer.name, input
                    )));
                }
            }
            defined.insert(layer.id);

            if layer.inputs.len() != layer.kind.arity() {
                return Err(invalid(
                    layer,
                    format!(
                        "{} expects {} input(s), got {}",
                        layer.kind,
                        layer.kind.arity(),
                        layer.inputs.len()
                    ),
                ));
            }
            if layer.output_shape.num_elements() == 0 {
                return Err(invalid(layer, "output shape has zero elements"));
            }
            self.check_parameters(layer)?;
        }

        let mut state_ids = HashSet::new();
        for state in &self.states {
            if !state_ids.insert(state.id) {
                return Err(ModelError::State {
                    state: state.name.clone(),
                    detail: "declared twice".into(),
                });
            }
            let writers = self
                .layers
                .iter()
                .filter(|l| matches!(l.kind, LayerKind::MemoryWrite { state: s } if s == state.id))
                .count();
            if writers != 1 {
                return Err(ModelError::State {
                    state: state.name.clone(),
                    detail: format!("needs exactly one memory write, found {writers}"),
                });
            }
        }

        for out in &self.outputs {
            if !defined.contains(out) {
                return Err(ModelError::Topology(format!(
                    "output {out} is not a layer of the graph"
                )));
            }
        }

        tracing::debug!(
            graph = %self.name,
            layers = self.layers.len(),
            states = self.states.len(),
            "graph validated"
        );

        Ok(Graph {
            name: self.name,
            layers: self.layers,
            states: self.states,
            outputs: self.outputs,
            stage: self.stage,
            next_id: self.next_id,
            _state: std::marker::PhantomData,
        })
    }

    fn check_parameters(&self, layer: &Layer) -> Result<(), ModelError> {
        let in_elems = |i: usize| -> usize {
            layer
                .inputs
                .get(i)
                .and_then(|id| self.layer(*id))
                .map_or(0, |l| l.output_shape.num_elements())
        };
        let out = layer.output_shape.num_elements();

        match &layer.kind {
            LayerKind::Input => {}
            LayerKind::Affine { weights, biases } => {
                if weights.len() != out * in_elems(0) {
                    return Err(invalid(
                        layer,
                        format!(
                            "weights hold {} values, expected {}x{}",
                            weights.len(),
                            out,
                            in_elems(0)
                        ),
                    ));
                }
                check_bias(layer, biases.as_ref(), out)?;
            }
            LayerKind::Diagonal { weights, biases } => {
                expect_same(layer, in_elems(0), out)?;
                if weights.len() != out {
                    return Err(invalid(layer, "diagonal weights must match the vector length"));
                }
                check_bias(layer, biases.as_ref(), out)?;
            }
            LayerKind::ScaleShift { scale, shift } => {
                expect_same(layer, in_elems(0), out)?;
                if scale.len() != out {
                    return Err(invalid(layer, "scale must match the vector length"));
                }
                check_bias(layer, shift.as_ref(), out)?;
            }
            LayerKind::Convolution {
                filters,
                biases,
                in_channels,
                kernel,
                ..
            } => {
                let producer_channels = layer
                    .inputs
                    .first()
                    .and_then(|id| self.layer(*id))
                    .map_or(0, |l| l.output_shape.channels());
                if producer_channels != *in_channels {
                    return Err(invalid(
                        layer,
                        format!("expects {in_channels} input channels, producer has {producer_channels}"),
                    ));
                }
                let num_filters = layer.output_shape.channels();
                if filters.len() != num_filters * in_channels * kernel {
                    return Err(invalid(
                        layer,
                        format!(
                            "filters hold {} values, expected {}x{}x{}",
                            filters.len(),
                            num_filters,
                            in_channels,
                            kernel
                        ),
                    ));
                }
                check_bias(layer, biases.as_ref(), num_filters)?;
            }
            LayerKind::Pooling { channels, .. } => {
                let producer_channels = layer
                    .inputs
                    .first()
                    .and_then(|id| self.layer(*id))
                    .map_or(0, |l| l.output_shape.channels());
                if producer_channels != *channels {
                    return Err(invalid(layer, "channel count differs from producer"));
                }
            }
            LayerKind::Activation { .. } | LayerKind::Pwl { .. } | LayerKind::Copy => {
                expect_same(layer, in_elems(0), out)?;
            }
            LayerKind::Eltwise { .. } => {
                expect_same(layer, in_elems(0), out)?;
                expect_same(layer, in_elems(1), out)?;
            }
            LayerKind::Crop { offset, len } => {
                if offset + len > in_elems(0) || *len != out {
                    return Err(invalid(
                        layer,
                        format!("crop [{offset}, {}) exceeds input of {}", offset + len, in_elems(0)),
                    ));
                }
            }
            LayerKind::MemoryRead { state } => {
                let decl = self.state(*state).ok_or_else(|| invalid(layer, "undeclared state"))?;
                expect_same(layer, decl.shape.num_elements(), out)?;
            }
            LayerKind::MemoryWrite { state } => {
                let decl = self.state(*state).ok_or_else(|| invalid(layer, "undeclared state"))?;
                expect_same(layer, in_elems(0), decl.shape.num_elements())?;
            }
        }
        Ok(())
    }
}

fn invalid(layer: &Layer, detail: impl Into<String>) -> ModelError {
    ModelError::InvalidLayer {
        layer: layer.name.clone(),
        detail: detail.into(),
    }
}

fn expect_same(layer: &Layer, got: usize, expected: usize) -> Result<(), ModelError> {
    if got != expected {
        return Err(invalid(
            layer,
            format!("element count mismatch: {got} vs {expected}"),
        ));
    }
    Ok(())
}

fn check_bias(layer: &Layer, bias: Option<&crate::Blob>, expected: usize) -> Result<(), ModelError> {
    match bias {
        Some(b) if b.len() != expected => Err(invalid(
            layer,
            format!("bias holds {} values, expected {expected}", b.len()),
        )),
        _ => Ok(()),
    }
}

// ── Validated state ────────────────────────────────────────────────

impl Graph<Validated> {
    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn states_mut(&mut self) -> &mut [StateDecl] {
        &mut self.states
    }

    pub fn set_stage(&mut self, stage: CompileStage) {
        self.stage = stage;
    }

    /// Inserts a single-input synthetic layer reading from `producer` and
    /// rewires `consumers` to read from it instead.
    ///
    /// The new layer takes the producer's output shape and is placed right
    /// after the producer, which keeps the order topological. Returns the
    /// new layer's id, or `None` if `producer` does not exist.
    pub fn insert_after(
        &mut self,
        producer: LayerId,
        name: &str,
        kind: LayerKind,
        synthetic: SyntheticKind,
        consumers: &[LayerId],
    ) -> Option<LayerId> {
        let pos = self.position(producer)?;
        let shape = self.layers[pos].output_shape.clone();
        let id = LayerId(self.next_id);
        self.next_id += 1;
        let name = self.unique_name(name);

        self.layers.insert(
            pos + 1,
            Layer {
                id,
                name,
                kind,
                inputs: vec![producer],
                output_shape: shape,
                origin: Origin::Synthetic(synthetic),
                quant: None,
            },
        );

        for layer in &mut self.layers {
            if consumers.contains(&layer.id) {
                for input in &mut layer.inputs {
                    if *input == producer {
                        *input = id;
                    }
                }
            }
        }
        Some(id)
    }

    /// Returns `base` or `base.N` for the smallest N making it unique.
    fn unique_name(&self, base: &str) -> String {
        if self.layer_by_name(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}.{n}"))
            .find(|candidate| self.layer_by_name(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Total number of float parameters.
    pub fn total_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.kind.num_parameters()).sum()
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        let synthetic = self.layers.iter().filter(|l| l.is_synthetic()).count();
        format!(
            "Graph '{}': {} layers ({} synthetic), {} states, {} parameters, stage {}",
            self.name,
            self.layers.len(),
            synthetic,
            self.states.len(),
            self.total_parameters(),
            self.stage,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> Graph<S> {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns an iterator over the layers in execution order.
    pub fn iter_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Index of `id` in execution order.
    pub fn position(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Layers reading from `id`, in execution order.
    pub fn consumers(&self, id: LayerId) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|l| l.inputs.contains(&id))
            .map(|l| l.id)
            .collect()
    }

    pub fn states(&self) -> &[StateDecl] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> Option<&StateDecl> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn outputs(&self) -> &[LayerId] {
        &self.outputs
    }

    pub fn is_output(&self, id: LayerId) -> bool {
        self.outputs.contains(&id)
    }

    /// Layers of kind `Input`, in declaration order.
    pub fn input_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers
            .iter()
            .filter(|l| matches!(l.kind, LayerKind::Input))
    }

    pub fn stage(&self) -> CompileStage {
        self.stage
    }

    /// Number of synthetic layers of the given kind.
    pub fn count_synthetic(&self, kind: SyntheticKind) -> usize {
        self.layers
            .iter()
            .filter(|l| l.origin == Origin::Synthetic(kind))
            .count()
    }
}

impl<S: GraphState> fmt::Display for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Graph '{}' ({} layers, stage {}):",
            self.name,
            self.layers.len(),
            self.stage
        )?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        for state in &self.states {
            writeln!(f, "  state '{}' {}", state.name, state.shape)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationFn, Blob, GraphBuilder};

    fn chain() -> Graph<Loaded> {
        let mut b = GraphBuilder::new("chain");
        let x = b.input("in", Shape::nc(1, 4));
        let fc = b.affine("fc", x, 2, vec![0.5; 8], Some(vec![0.1, -0.1]));
        let act = b.activation("act", fc, ActivationFn::Sigmoid);
        b.output(act);
        b.build()
    }

    fn raw(id: u32, name: &str, kind: LayerKind, inputs: Vec<u32>, n: usize) -> Layer {
        Layer {
            id: LayerId(id),
            name: name.into(),
            kind,
            inputs: inputs.into_iter().map(LayerId).collect(),
            output_shape: Shape::nc(1, n),
            origin: Origin::Source,
            quant: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        let g = chain().validate().unwrap();
        assert_eq!(g.num_layers(), 3);
        assert_eq!(g.stage(), CompileStage::Source);
        assert_eq!(g.outputs().len(), 1);
    }

    #[test]
    fn test_validate_empty() {
        let g = Graph::new("empty".into(), vec![], vec![], vec![]);
        assert!(matches!(g.validate(), Err(ModelError::Topology(_))));
    }

    #[test]
    fn test_validate_forward_reference() {
        let layers = vec![
            raw(0, "in", LayerKind::Input, vec![], 4),
            raw(1, "copy", LayerKind::Copy, vec![2], 4),
            raw(2, "copy2", LayerKind::Copy, vec![0], 4),
        ];
        let g = Graph::new("fwd".into(), layers, vec![], vec![]);
        assert!(matches!(g.validate(), Err(ModelError::Topology(_))));
    }

    #[test]
    fn test_validate_bad_arity() {
        let layers = vec![
            raw(0, "in", LayerKind::Input, vec![], 4),
            raw(1, "sum", LayerKind::Eltwise { op: crate::EltwiseOp::Sum }, vec![0], 4),
        ];
        let g = Graph::new("arity".into(), layers, vec![], vec![]);
        assert!(matches!(g.validate(), Err(ModelError::InvalidLayer { .. })));
    }

    #[test]
    fn test_validate_weight_size() {
        let layers = vec![
            raw(0, "in", LayerKind::Input, vec![], 4),
            raw(
                1,
                "fc",
                LayerKind::Affine {
                    weights: Blob::vector(vec![1.0; 7]),
                    biases: None,
                },
                vec![0],
                2,
            ),
        ];
        let g = Graph::new("w".into(), layers, vec![], vec![]);
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("fc"));
    }

    #[test]
    fn test_validate_state_needs_writer() {
        let mut b = GraphBuilder::new("mem");
        let s = b.state("h", Shape::nc(1, 4));
        let r = b.memory_read("h_read", s);
        b.output(r);
        match b.build().validate() {
            Err(ModelError::State { state, .. }) => assert_eq!(state, "h"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_insert_after_rewires_consumers() {
        let mut g = chain().validate().unwrap();
        let fc = g.layer_by_name("fc").unwrap().id;
        let act = g.layer_by_name("act").unwrap().id;
        let copy = g
            .insert_after(fc, "fc/copy", LayerKind::Copy, SyntheticKind::AlignmentCopy, &[act])
            .unwrap();

        assert_eq!(g.num_layers(), 4);
        assert_eq!(g.position(copy), Some(2));
        assert_eq!(g.layer(act).unwrap().inputs, vec![copy]);
        assert_eq!(g.consumers(fc), vec![copy]);
        assert_eq!(g.count_synthetic(SyntheticKind::AlignmentCopy), 1);

        // Names stay unique.
        let again = g
            .insert_after(fc, "fc/copy", LayerKind::Copy, SyntheticKind::AlignmentCopy, &[])
            .unwrap();
        assert_eq!(g.layer(again).unwrap().name, "fc/copy.1");
    }

    #[test]
    fn test_summary_and_display() {
        let g = chain().validate().unwrap();
        let s = g.summary();
        assert!(s.contains("chain"));
        assert!(s.contains("3 layers"));
        let display = format!("{g}");
        assert!(display.contains("fc"));
        assert!(display.contains("act"));
    }
}
