// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Incremental construction of source graphs.
//!
//! Layers are appended in call order, which is therefore the topological
//! order. Output shapes are inferred from the producer; inconsistent
//! arguments yield shapes that [`Graph::validate`] rejects.

use crate::graph::{Graph, Loaded, StateDecl, Validated};
use crate::{
    ActivationFn, Blob, EltwiseOp, Layer, LayerId, LayerKind, ModelError, Origin, PoolingKind,
    StateId,
};
use tensor_core::Shape;

/// Builds a [`Graph`] one layer at a time.
///
/// # Example
/// ```
/// use model_ir::{ActivationFn, GraphBuilder};
/// use tensor_core::Shape;
///
/// let mut b = GraphBuilder::new("mlp");
/// let x = b.input("in", Shape::nc(1, 2));
/// let fc = b.affine("fc", x, 2, vec![1.0, 0.0, 0.0, 1.0], None);
/// let y = b.activation("act", fc, ActivationFn::Tanh);
/// b.output(y);
/// let graph = b.finish().unwrap();
/// assert_eq!(graph.num_layers(), 3);
/// ```
#[derive(Debug)]
pub struct GraphBuilder {
    name: String,
    layers: Vec<Layer>,
    states: Vec<StateDecl>,
    outputs: Vec<LayerId>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            states: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Appends a layer with an explicit kind and output shape.
    pub fn layer(
        &mut self,
        name: impl Into<String>,
        kind: LayerKind,
        inputs: Vec<LayerId>,
        output_shape: Shape,
    ) -> LayerId {
        let id = LayerId(self.layers.len() as u32);
        self.layers.push(Layer {
            id,
            name: name.into(),
            kind,
            inputs,
            output_shape,
            origin: Origin::Source,
            quant: None,
        });
        id
    }

    fn shape_of(&self, id: LayerId) -> Shape {
        self.layers
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.output_shape.clone())
            .unwrap_or_else(|| Shape::vector(0))
    }

    pub fn input(&mut self, name: impl Into<String>, shape: Shape) -> LayerId {
        self.layer(name, LayerKind::Input, vec![], shape)
    }

    /// Fully connected layer; `weights` is row-major `[outputs, inputs]`.
    pub fn affine(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        outputs: usize,
        weights: Vec<f32>,
        biases: Option<Vec<f32>>,
    ) -> LayerId {
        let inputs = self.shape_of(input).num_elements();
        let kind = LayerKind::Affine {
            weights: Blob::new(Shape::new(vec![outputs, inputs]), weights),
            biases: biases.map(Blob::vector),
        };
        self.layer(name, kind, vec![input], Shape::nc(1, outputs))
    }

    /// 1-D convolution; `filters` is `[num_filters, in_channels, kernel]`.
    #[allow(clippy::too_many_arguments)]
    pub fn convolution(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        num_filters: usize,
        kernel: usize,
        stride: usize,
        filters: Vec<f32>,
        biases: Option<Vec<f32>>,
    ) -> LayerId {
        let in_shape = self.shape_of(input);
        let in_channels = in_shape.channels();
        let out_width = output_width(in_shape.width(), kernel, stride);
        let kind = LayerKind::Convolution {
            filters: Blob::new(Shape::new(vec![num_filters, in_channels, kernel]), filters),
            biases: biases.map(Blob::vector),
            in_channels,
            kernel,
            stride,
        };
        self.layer(name, kind, vec![input], Shape::ncw(1, num_filters, out_width))
    }

    pub fn pooling(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        kind: PoolingKind,
        window: usize,
        stride: usize,
    ) -> LayerId {
        let in_shape = self.shape_of(input);
        let channels = in_shape.channels();
        let out_width = output_width(in_shape.width(), window, stride);
        let kind = LayerKind::Pooling {
            kind,
            window,
            stride,
            channels,
        };
        self.layer(name, kind, vec![input], Shape::ncw(1, channels, out_width))
    }

    pub fn activation(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        function: ActivationFn,
    ) -> LayerId {
        let shape = self.shape_of(input);
        self.layer(name, LayerKind::Activation { function }, vec![input], shape)
    }

    /// Per-element `x * scale + shift`.
    pub fn scale_shift(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        scale: Vec<f32>,
        shift: Option<Vec<f32>>,
    ) -> LayerId {
        let shape = self.shape_of(input);
        let kind = LayerKind::ScaleShift {
            scale: Blob::vector(scale),
            shift: shift.map(Blob::vector),
        };
        self.layer(name, kind, vec![input], shape)
    }

    pub fn eltwise(
        &mut self,
        name: impl Into<String>,
        op: EltwiseOp,
        a: LayerId,
        b: LayerId,
    ) -> LayerId {
        let shape = self.shape_of(a);
        self.layer(name, LayerKind::Eltwise { op }, vec![a, b], shape)
    }

    pub fn crop(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        offset: usize,
        len: usize,
    ) -> LayerId {
        self.layer(
            name,
            LayerKind::Crop { offset, len },
            vec![input],
            Shape::nc(1, len),
        )
    }

    /// Declares a recurrent state buffer.
    pub fn state(&mut self, name: impl Into<String>, shape: Shape) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(StateDecl {
            id,
            name: name.into(),
            shape,
            scale: None,
        });
        id
    }

    pub fn memory_read(&mut self, name: impl Into<String>, state: StateId) -> LayerId {
        let shape = self
            .states
            .iter()
            .find(|s| s.id == state)
            .map(|s| s.shape.clone())
            .unwrap_or_else(|| Shape::vector(0));
        self.layer(name, LayerKind::MemoryRead { state }, vec![], shape)
    }

    pub fn memory_write(
        &mut self,
        name: impl Into<String>,
        input: LayerId,
        state: StateId,
    ) -> LayerId {
        let shape = self.shape_of(input);
        self.layer(name, LayerKind::MemoryWrite { state }, vec![input], shape)
    }

    /// Marks a layer's result as a graph output.
    pub fn output(&mut self, id: LayerId) {
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
    }

    pub fn build(self) -> Graph<Loaded> {
        Graph::new(self.name, self.layers, self.states, self.outputs)
    }

    /// Builds and validates in one step.
    pub fn finish(self) -> Result<Graph<Validated>, ModelError> {
        self.build().validate()
    }
}

/// Output width of a sliding window; 0 if the window does not fit.
fn output_width(width: usize, window: usize, stride: usize) -> usize {
    if window == 0 || stride == 0 || width < window {
        0
    } else {
        (width - window) / stride + 1
    }
}
