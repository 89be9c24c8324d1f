// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activation approximation by piecewise-linear segments.
//!
//! The device evaluates activations only as PWL functions. Identity and the
//! ReLU family are already piecewise linear and map to exact segments.
//! Saturating functions (sigmoid, tanh) are fitted on the domain where they
//! differ from their asymptotes by more than the error bound, with flat
//! tails outside it:
//!
//! ```text
//!   tail │ chord │ chord │ ... │ chord │ tail
//!  ──────┼───────┼───────┼─────┼───────┼──────
//!      -x_sat                        x_sat
//! ```
//!
//! Each chord is grown greedily to the widest span whose maximum deviation
//! from the function stays within the bound.

use crate::pass::Pass;
use crate::{PassReport, TransformContext, TransformError};
use model_ir::{ActivationFn, Graph, LayerKind, Origin, PwlSegment, SyntheticKind, Validated};

/// Sample points per chord when measuring its deviation.
const CHORD_SAMPLES: usize = 32;

/// Bisection steps when searching for the widest acceptable chord.
const BISECT_STEPS: usize = 48;

/// Smallest chord width; guarantees progress for unreachable bounds.
const MIN_WIDTH: f64 = 1e-6;

/// The fitter needed more segments than the hardware supports.
#[derive(Debug, Clone, PartialEq)]
pub struct FitError {
    pub max_segments: usize,
    pub tolerance: f64,
}

/// The identity function as a single segment.
pub fn identity_segments() -> Vec<PwlSegment> {
    vec![segment(0.0, 0.0, 1.0)]
}

fn segment(x_start: f64, y_start: f64, slope: f64) -> PwlSegment {
    PwlSegment {
        x_start,
        y_start,
        slope,
    }
}

/// Fits `function` with at most `max_segments` segments whose deviation
/// stays under `max_error_percent` of the function's output range.
pub fn fit_segments(
    function: ActivationFn,
    max_error_percent: f64,
    max_segments: usize,
) -> Result<Vec<PwlSegment>, FitError> {
    let segments = match function {
        ActivationFn::Identity => identity_segments(),
        ActivationFn::Relu => vec![segment(-1.0, 0.0, 0.0), segment(0.0, 0.0, 1.0)],
        ActivationFn::LeakyRelu { negative_slope } => {
            let a = negative_slope as f64;
            vec![segment(-1.0, -a, a), segment(0.0, 0.0, 1.0)]
        }
        ActivationFn::Sigmoid | ActivationFn::Tanh => {
            let (lo, hi) = function.output_bounds().unwrap_or((-1.0, 1.0));
            let tolerance = max_error_percent / 100.0 * (hi - lo);
            fit_saturating(function, tolerance, max_segments)?
        }
    };

    if segments.len() > max_segments {
        return Err(FitError {
            max_segments,
            tolerance: 0.0,
        });
    }
    Ok(segments)
}

/// Input beyond which the function is within `tolerance` of its asymptote.
fn saturation_point(function: ActivationFn, tolerance: f64) -> f64 {
    let x = match function {
        ActivationFn::Sigmoid => ((1.0 - tolerance) / tolerance).ln(),
        ActivationFn::Tanh => (1.0 - tolerance).atanh(),
        _ => 1.0,
    };
    if x.is_finite() {
        x.max(0.5)
    } else {
        0.5
    }
}

fn fit_saturating(
    function: ActivationFn,
    tolerance: f64,
    max_segments: usize,
) -> Result<Vec<PwlSegment>, FitError> {
    let fail = FitError {
        max_segments,
        tolerance,
    };
    if tolerance.is_nan() || tolerance <= 0.0 {
        return Err(fail);
    }

    let f = |x: f64| function.eval(x);
    let x_sat = saturation_point(function, tolerance);

    let mut segments = vec![segment(-x_sat - 1.0, f(-x_sat), 0.0)];
    let mut x0 = -x_sat;
    while x0 < x_sat {
        // Two tails plus the chords so far.
        if segments.len() + 1 >= max_segments {
            return Err(fail);
        }
        let x1 = widest_chord(&f, x0, x_sat, tolerance);
        let slope = (f(x1) - f(x0)) / (x1 - x0);
        segments.push(segment(x0, f(x0), slope));
        x0 = x1;
    }
    segments.push(segment(x_sat, f(x_sat), 0.0));
    Ok(segments)
}

/// Maximum deviation of the chord `(a, f(a))–(b, f(b))` from `f`.
fn chord_error(f: &impl Fn(f64) -> f64, a: f64, b: f64) -> f64 {
    let (fa, fb) = (f(a), f(b));
    let slope = (fb - fa) / (b - a);
    (1..CHORD_SAMPLES)
        .map(|i| {
            let x = a + (b - a) * i as f64 / CHORD_SAMPLES as f64;
            (f(x) - (fa + slope * (x - a))).abs()
        })
        .fold(0.0, f64::max)
}

fn widest_chord(f: &impl Fn(f64) -> f64, x0: f64, end: f64, tolerance: f64) -> f64 {
    if chord_error(f, x0, end) <= tolerance {
        return end;
    }
    let (mut lo, mut hi) = (x0, end);
    for _ in 0..BISECT_STEPS {
        let mid = 0.5 * (lo + hi);
        if chord_error(f, x0, mid) <= tolerance {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo.max(x0 + MIN_WIDTH).min(end)
}

/// Largest deviation between `function` and its segments over `[lo, hi]`.
pub fn approximation_error(function: ActivationFn, segments: &[PwlSegment], lo: f64, hi: f64) -> f64 {
    const STEPS: usize = 2048;
    (0..=STEPS)
        .map(|i| {
            let x = lo + (hi - lo) * i as f64 / STEPS as f64;
            (function.eval(x) - PwlSegment::eval_list(segments, x)).abs()
        })
        .fold(0.0, f64::max)
}

/// Replaces every activation layer with a synthetic PWL layer.
#[derive(Debug, Clone, Default)]
pub struct ApproximateActivations;

impl ApproximateActivations {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for ApproximateActivations {
    fn name(&self) -> &str {
        "approximate-activations"
    }

    fn run(
        &self,
        graph: &mut Graph<Validated>,
        ctx: &TransformContext,
    ) -> Result<PassReport, TransformError> {
        let mut report = PassReport::new(self.name());
        for layer in graph.layers_mut() {
            let function = match layer.kind {
                LayerKind::Activation { function } => function,
                _ => continue,
            };
            let segments = fit_segments(
                function,
                ctx.pwl_max_error_percent,
                ctx.limits.max_pwl_segments,
            )
            .map_err(|e| TransformError::Quantization {
                layer: layer.name.clone(),
                detail: format!(
                    "{function} needs more than {} PWL segments to stay within {}% error",
                    e.max_segments, ctx.pwl_max_error_percent
                ),
            })?;

            tracing::debug!(
                layer = %layer.name,
                %function,
                segments = segments.len(),
                "activation -> pwl"
            );
            layer.kind = LayerKind::Pwl { function, segments };
            layer.origin = Origin::Synthetic(SyntheticKind::Pwl);
            report.rewritten += 1;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HardwareLimits;
    use model_ir::GraphBuilder;
    use tensor_core::Shape;

    #[test]
    fn test_exact_functions() {
        let relu = fit_segments(ActivationFn::Relu, 1.0, 128).unwrap();
        assert_eq!(approximation_error(ActivationFn::Relu, &relu, -10.0, 10.0), 0.0);

        let leaky = ActivationFn::LeakyRelu {
            negative_slope: 0.25,
        };
        let segs = fit_segments(leaky, 1.0, 128).unwrap();
        assert!(approximation_error(leaky, &segs, -10.0, 10.0) < 1e-12);

        assert_eq!(identity_segments().len(), 1);
        assert_eq!(PwlSegment::eval_list(&identity_segments(), -7.5), -7.5);
    }

    #[test]
    fn test_sigmoid_within_bound() {
        let segs = fit_segments(ActivationFn::Sigmoid, 1.0, 128).unwrap();
        assert!(segs.len() > 3);
        assert!(segs.len() <= 128);
        let err = approximation_error(ActivationFn::Sigmoid, &segs, -20.0, 20.0);
        // 1% of the [0, 1] range, with slack for the sampled chord check.
        assert!(err <= 0.0105, "error {err}");
    }

    #[test]
    fn test_tanh_within_bound() {
        let segs = fit_segments(ActivationFn::Tanh, 0.5, 128).unwrap();
        let err = approximation_error(ActivationFn::Tanh, &segs, -10.0, 10.0);
        assert!(err <= 0.0105, "error {err}");
    }

    #[test]
    fn test_tighter_bound_needs_more_segments() {
        let coarse = fit_segments(ActivationFn::Sigmoid, 2.0, 128).unwrap();
        let fine = fit_segments(ActivationFn::Sigmoid, 0.2, 128).unwrap();
        assert!(fine.len() > coarse.len());
    }

    #[test]
    fn test_segments_sorted() {
        let segs = fit_segments(ActivationFn::Tanh, 1.0, 128).unwrap();
        assert!(segs.windows(2).all(|w| w[0].x_start < w[1].x_start));
    }

    #[test]
    fn test_unreachable_bound_fails() {
        assert!(fit_segments(ActivationFn::Sigmoid, 0.0001, 128).is_err());
        assert!(fit_segments(ActivationFn::Sigmoid, 1.0, 4).is_err());
        assert!(fit_segments(ActivationFn::Sigmoid, 0.0, 128).is_err());
    }

    #[test]
    fn test_pass_rewrites_and_reports_quantization_error() {
        let mut b = GraphBuilder::new("act");
        let x = b.input("in", Shape::nc(1, 4));
        let a = b.activation("sig", x, ActivationFn::Sigmoid);
        b.output(a);
        let g = b.finish().unwrap();

        let mut ok = g.clone();
        let report = ApproximateActivations::new()
            .run(&mut ok, &TransformContext::default())
            .unwrap();
        assert_eq!(report.rewritten, 1);
        assert_eq!(ok.layer(a).unwrap().origin, Origin::Synthetic(SyntheticKind::Pwl));

        let tight = TransformContext {
            pwl_max_error_percent: 0.0001,
            limits: HardwareLimits::default(),
            ..TransformContext::default()
        };
        let mut failing = g;
        match ApproximateActivations::new().run(&mut failing, &tight) {
            Err(TransformError::Quantization { layer, .. }) => assert_eq!(layer, "sig"),
            other => panic!("expected quantization error, got {other:?}"),
        }
    }
}
