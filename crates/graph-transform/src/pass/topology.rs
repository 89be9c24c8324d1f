// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware shape validation.
//!
//! Checks every layer against [`HardwareLimits`]. Nothing is rewritten: a
//! layer outside the supported range fails the whole pipeline instead of
//! being truncated.

use crate::pass::Pass;
use crate::{HardwareLimits, PassReport, TransformContext, TransformError};
use model_ir::{Graph, Layer, LayerKind, Validated};

#[derive(Debug, Clone, Default)]
pub struct ValidateTopology;

impl ValidateTopology {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for ValidateTopology {
    fn name(&self) -> &str {
        "validate-topology"
    }

    fn run(
        &self,
        graph: &mut Graph<Validated>,
        ctx: &TransformContext,
    ) -> Result<PassReport, TransformError> {
        for layer in graph.iter_layers() {
            if layer.inputs.len() != layer.kind.arity() {
                return Err(unsupported(
                    layer,
                    format!("expects {} input(s), has {}", layer.kind.arity(), layer.inputs.len()),
                ));
            }
            for input in &layer.inputs {
                if graph.layer(*input).is_none() {
                    return Err(unsupported(layer, format!("dangling input {input}")));
                }
            }
            check_layer(layer, &ctx.limits)?;
        }
        Ok(PassReport::new(self.name()))
    }
}

fn check_layer(layer: &Layer, limits: &HardwareLimits) -> Result<(), TransformError> {
    let elems = layer.output_shape.num_elements();
    if elems > limits.max_layer_elements {
        return Err(unsupported(
            layer,
            format!("{elems} elements exceed the maximum of {}", limits.max_layer_elements),
        ));
    }

    match &layer.kind {
        LayerKind::Convolution {
            in_channels,
            kernel,
            stride,
            ..
        } => {
            let filters = layer.output_shape.channels();
            if *kernel == 0 || in_channels * kernel > limits.max_conv_kernel_elements {
                return Err(unsupported(
                    layer,
                    format!(
                        "kernel of {in_channels}x{kernel} elements outside 1..={}",
                        limits.max_conv_kernel_elements
                    ),
                ));
            }
            if filters > limits.max_conv_filters || filters % limits.conv_filter_multiple.max(1) != 0
            {
                return Err(unsupported(
                    layer,
                    format!(
                        "{filters} filters; need a multiple of {} up to {}",
                        limits.conv_filter_multiple, limits.max_conv_filters
                    ),
                ));
            }
            if *stride == 0 || stride > kernel {
                return Err(unsupported(
                    layer,
                    format!("stride {stride} outside 1..={kernel}"),
                ));
            }
        }
        LayerKind::Pooling { window, stride, .. } => {
            if *window == 0 || *window > limits.max_pool_window {
                return Err(unsupported(
                    layer,
                    format!("pooling window {window} outside 1..={}", limits.max_pool_window),
                ));
            }
            if *stride == 0 || stride > window {
                return Err(unsupported(
                    layer,
                    format!("stride {stride} outside 1..={window}"),
                ));
            }
        }
        LayerKind::Input
        | LayerKind::Affine { .. }
        | LayerKind::Activation { .. }
        | LayerKind::ScaleShift { .. }
        | LayerKind::Eltwise { .. }
        | LayerKind::Crop { .. }
        | LayerKind::MemoryRead { .. }
        | LayerKind::MemoryWrite { .. }
        | LayerKind::Diagonal { .. }
        | LayerKind::Pwl { .. }
        | LayerKind::Copy => {}
    }
    Ok(())
}

fn unsupported(layer: &Layer, detail: String) -> TransformError {
    TransformError::UnsupportedTopology {
        layer: layer.name.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{GraphBuilder, PoolingKind};
    use tensor_core::Shape;

    fn conv_graph(filters: usize, kernel: usize, stride: usize) -> Graph<Validated> {
        let mut b = GraphBuilder::new("cnn");
        let x = b.input("in", Shape::ncw(1, 2, 16));
        let c = b.convolution("conv", x, filters, kernel, stride, vec![0.1; filters * 2 * kernel], None);
        b.output(c);
        b.finish().unwrap()
    }

    fn run(mut g: Graph<Validated>) -> Result<PassReport, TransformError> {
        ValidateTopology::new().run(&mut g, &TransformContext::default())
    }

    #[test]
    fn test_supported_convolution() {
        let report = run(conv_graph(8, 3, 1)).unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_filter_multiple() {
        let err = run(conv_graph(6, 3, 1)).unwrap_err();
        match err {
            TransformError::UnsupportedTopology { layer, detail } => {
                assert_eq!(layer, "conv");
                assert!(detail.contains("multiple of 4"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_stride_larger_than_kernel() {
        assert!(run(conv_graph(4, 2, 3)).is_err());
    }

    #[test]
    fn test_kernel_elements_limit() {
        let mut g = conv_graph(4, 3, 1);
        let ctx = TransformContext {
            limits: HardwareLimits {
                max_conv_kernel_elements: 4,
                ..HardwareLimits::default()
            },
            ..TransformContext::default()
        };
        assert!(ValidateTopology::new().run(&mut g, &ctx).is_err());
    }

    #[test]
    fn test_pooling_window() {
        let mut b = GraphBuilder::new("pool");
        let x = b.input("in", Shape::ncw(1, 1, 32));
        let p = b.pooling("pool", x, PoolingKind::Max, 8, 8);
        b.output(p);
        let err = run(b.finish().unwrap()).unwrap_err();
        assert!(err.to_string().contains("window 8"));
    }

    #[test]
    fn test_layer_too_wide() {
        let mut b = GraphBuilder::new("wide");
        let x = b.input("in", Shape::nc(1, 70_000));
        b.output(x);
        assert!(run(b.finish().unwrap()).is_err());
    }
}
