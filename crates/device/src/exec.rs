// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bit-exact interpreter for the accelerator instruction set.
//!
//! All arithmetic runs in `i64` and is saturated to the output region's
//! element type on store. PWL evaluation and rescaling use the same helpers
//! as the quantizer, so compile-time error estimates hold at run time.

use executable::{ExecutableModel, Operation, TensorRef};
use model_ir::quant::eval_pwl;
use model_ir::{EltwiseOp, PoolingKind};
use tensor_core::fixed::{read_int, saturate, write_int};
use tensor_core::DType;

/// Multiply-accumulate lanes of the simulated engine.
const MAC_LANES: u64 = 8;
/// Fixed setup cost of every instruction, in cycles.
const SETUP_CYCLES: u64 = 12;

/// A resolved tensor: byte offset into the arena, element count and type.
#[derive(Debug, Clone, Copy)]
struct View {
    start: usize,
    len: usize,
    dtype: DType,
}

fn resolve(arena: &[u8], model: &ExecutableModel, t: &TensorRef) -> Result<View, String> {
    let region = model
        .region(t.region)
        .ok_or_else(|| format!("instruction references missing region {}", t.region))?;
    if !region.dtype.is_integer() {
        return Err(format!("region '{}' is not an integer buffer", region.name));
    }
    let (start, end) = model
        .byte_span(t)
        .ok_or_else(|| format!("bad tensor reference into region {}", t.region))?;
    if end > region.end() || end as usize > arena.len() {
        return Err(format!(
            "access [{start}, {end}) outside region '{}' or arena of {} bytes",
            region.name,
            arena.len()
        ));
    }
    Ok(View {
        start: start as usize,
        len: t.len as usize,
        dtype: region.dtype,
    })
}

fn load(arena: &[u8], v: View) -> Vec<i64> {
    let bytes = &arena[v.start..];
    (0..v.len).map(|i| read_int(bytes, v.dtype, i)).collect()
}

fn store(arena: &mut [u8], v: View, values: &[i64]) {
    let bytes = &mut arena[v.start..];
    for (i, value) in values.iter().enumerate().take(v.len) {
        write_int(bytes, v.dtype, i, *value);
    }
}

/// Integer division rounding half away from zero.
fn div_round(num: i64, den: i64) -> i64 {
    if den == 0 {
        return 0;
    }
    let q = (num.abs() + den.abs() / 2) / den.abs();
    if (num < 0) != (den < 0) {
        -q
    } else {
        q
    }
}

fn lanes(work: u64) -> u64 {
    work.div_ceil(MAC_LANES)
}

/// Executes every instruction of `model` against `arena`. Returns the
/// cycle count of each instruction, or a fault description.
pub(crate) fn run(arena: &mut [u8], model: &ExecutableModel) -> Result<Vec<u64>, String> {
    model
        .instructions
        .iter()
        .map(|inst| execute(arena, model, &inst.op).map_err(|e| format!("{}: {e}", inst.layer)))
        .collect()
}

fn execute(arena: &mut [u8], model: &ExecutableModel, op: &Operation) -> Result<u64, String> {
    let data: &[u8] = arena;
    let view = |t: &TensorRef| resolve(data, model, t);
    let fetch = |t: &TensorRef| view(t).map(|v| load(data, v));
    let opt_fetch = |t: &Option<TensorRef>, n: usize| match t {
        Some(t) => fetch(t),
        None => Ok(vec![0; n]),
    };

    let (out_view, values, cycles) = match op {
        Operation::Affine {
            input,
            weights,
            biases,
            output,
            rows,
            cols,
        } => {
            let (rows, cols) = (*rows as usize, *cols as usize);
            let x = fetch(input)?;
            let w = fetch(weights)?;
            let b = opt_fetch(biases, rows)?;
            if x.len() != cols || w.len() != rows * cols || b.len() != rows {
                return Err(format!("affine {rows}x{cols} operand sizes disagree"));
            }
            let out: Vec<i64> = (0..rows)
                .map(|r| {
                    let row = &w[r * cols..(r + 1) * cols];
                    b[r] + row.iter().zip(&x).map(|(w, x)| w * x).sum::<i64>()
                })
                .collect();
            let cycles = rows as u64 * lanes(cols as u64);
            (view(output)?, out, cycles)
        }

        Operation::Diagonal {
            input,
            weights,
            biases,
            output,
        } => {
            let x = fetch(input)?;
            let w = fetch(weights)?;
            let b = opt_fetch(biases, x.len())?;
            if w.len() != x.len() || b.len() != x.len() {
                return Err("diagonal operand sizes disagree".into());
            }
            let out: Vec<i64> = (0..x.len()).map(|i| b[i] + w[i] * x[i]).collect();
            (view(output)?, out, lanes(x.len() as u64))
        }

        Operation::Convolution {
            input,
            filters,
            biases,
            output,
            in_channels,
            width,
            num_filters,
            kernel,
            stride,
        } => {
            let (c, w, f, k, s) = (
                *in_channels as usize,
                *width as usize,
                *num_filters as usize,
                *kernel as usize,
                (*stride as usize).max(1),
            );
            let x = fetch(input)?;
            let filt = fetch(filters)?;
            let b = opt_fetch(biases, f)?;
            let out_view = view(output)?;
            if k == 0 || w < k || x.len() != c * w || filt.len() != f * c * k || b.len() != f {
                return Err("convolution operand sizes disagree".into());
            }
            let out_w = (w - k) / s + 1;
            if out_view.len != f * out_w {
                return Err(format!("convolution output holds {} not {}", out_view.len, f * out_w));
            }
            let mut out = vec![0i64; f * out_w];
            for fi in 0..f {
                for o in 0..out_w {
                    let mut acc = b[fi];
                    for ci in 0..c {
                        for ki in 0..k {
                            acc += filt[(fi * c + ci) * k + ki] * x[ci * w + o * s + ki];
                        }
                    }
                    out[fi * out_w + o] = acc;
                }
            }
            let cycles = (f * out_w) as u64 * lanes((c * k) as u64);
            (out_view, out, cycles)
        }

        Operation::Pooling {
            input,
            output,
            kind,
            channels,
            width,
            window,
            stride,
        } => {
            let (c, w, win, s) = (
                *channels as usize,
                *width as usize,
                (*window as usize).max(1),
                (*stride as usize).max(1),
            );
            let x = fetch(input)?;
            let out_view = view(output)?;
            if x.len() != c * w || c == 0 || out_view.len % c != 0 {
                return Err("pooling operand sizes disagree".into());
            }
            let out_w = out_view.len / c;
            let mut out = vec![0i64; c * out_w];
            for ci in 0..c {
                for o in 0..out_w {
                    let lo = o * s;
                    let hi = (lo + win).min(w);
                    if lo >= hi {
                        return Err(format!("pooling window {o} starts past the input"));
                    }
                    let window = &x[ci * w + lo..ci * w + hi];
                    out[ci * out_w + o] = match kind {
                        PoolingKind::Max => window.iter().copied().max().unwrap_or(0),
                        PoolingKind::Avg => {
                            div_round(window.iter().sum::<i64>(), window.len() as i64)
                        }
                    };
                }
            }
            let cycles = lanes((c * out_w * win) as u64);
            (out_view, out, cycles)
        }

        Operation::Eltwise {
            op,
            a,
            b,
            output,
            multipliers,
        } => {
            let xa = fetch(a)?;
            let xb = fetch(b)?;
            if xa.len() != xb.len() {
                return Err("eltwise operand sizes disagree".into());
            }
            let ma = multipliers.first().copied().unwrap_or(1) as i64;
            let mb = multipliers.get(1).copied().unwrap_or(1) as i64;
            let out: Vec<i64> = xa
                .iter()
                .zip(&xb)
                .map(|(a, b)| match op {
                    EltwiseOp::Sum => a * ma + b * mb,
                    EltwiseOp::Prod => a * b,
                })
                .collect();
            (view(output)?, out, lanes(xa.len() as u64))
        }

        Operation::Pwl {
            input,
            output,
            segments,
        } => {
            let out_view = view(output)?;
            let x = fetch(input)?;
            let out: Vec<i64> = x
                .iter()
                .map(|v| eval_pwl(segments, *v, out_view.dtype))
                .collect();
            // Segment lookup is a binary search per element.
            let depth = (usize::BITS - segments.len().leading_zeros()) as u64;
            (out_view, out, lanes(x.len() as u64 * depth.max(1)))
        }

        Operation::Copy {
            input,
            output,
            rescale,
        } => {
            let out_view = view(output)?;
            let x = fetch(input)?;
            if x.len() != out_view.len {
                return Err("copy sizes disagree".into());
            }
            let out: Vec<i64> = match rescale {
                Some(r) => x.iter().map(|v| r.apply(*v, out_view.dtype)).collect(),
                None => x.iter().map(|v| saturate(*v, out_view.dtype)).collect(),
            };
            let bytes = (out_view.len * out_view.dtype.size_bytes()) as u64;
            (out_view, out, bytes.div_ceil(64))
        }
    };

    store(arena, out_view, &values);
    Ok(SETUP_CYCLES + cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use executable::{Instruction, MemoryRegion, RegionKind};
    use model_ir::{FixedPwlSegment, Origin, Rescale};
    use tensor_core::fixed::{decode_ints, encode_ints};

    fn region(id: u32, kind: RegionKind, offset: u64, len: u64, dtype: DType) -> MemoryRegion {
        MemoryRegion {
            id,
            name: format!("r{id}"),
            kind,
            offset,
            size: len * dtype.size_bytes() as u64,
            dtype,
        }
    }

    fn model(regions: Vec<MemoryRegion>, ops: Vec<Operation>) -> ExecutableModel {
        ExecutableModel {
            name: "t".into(),
            regions,
            arena_size: 4096,
            parameters: Vec::new(),
            instructions: ops
                .into_iter()
                .map(|op| Instruction {
                    layer: op.as_str().into(),
                    origin: Origin::Source,
                    op,
                })
                .collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            states: Vec::new(),
            scales: Vec::new(),
        }
    }

    fn put(arena: &mut [u8], r: &MemoryRegion, values: &[i64]) {
        let bytes = encode_ints(values, r.dtype);
        let start = r.offset as usize;
        arena[start..start + bytes.len()].copy_from_slice(&bytes);
    }

    fn get(arena: &[u8], r: &MemoryRegion) -> Vec<i64> {
        decode_ints(&arena[r.offset as usize..r.end() as usize], r.dtype)
    }

    #[test]
    fn test_affine() {
        let regions = vec![
            region(0, RegionKind::Weights, 0, 6, DType::I16),
            region(1, RegionKind::Biases, 64, 2, DType::I32),
            region(2, RegionKind::Input, 128, 3, DType::I16),
            region(3, RegionKind::Accumulator, 192, 2, DType::I32),
        ];
        let m = model(
            regions.clone(),
            vec![Operation::Affine {
                input: TensorRef::whole(2, 3),
                weights: TensorRef::whole(0, 6),
                biases: Some(TensorRef::whole(1, 2)),
                output: TensorRef::whole(3, 2),
                rows: 2,
                cols: 3,
            }],
        );
        let mut arena = vec![0u8; 4096];
        put(&mut arena, &regions[0], &[1, 2, 3, -1, 0, 1]);
        put(&mut arena, &regions[1], &[10, -10]);
        put(&mut arena, &regions[2], &[1, 2, 3]);
        let cycles = run(&mut arena, &m).unwrap();
        assert_eq!(get(&arena, &regions[3]), vec![10 + 14, -10 + 2]);
        assert!(cycles[0] > SETUP_CYCLES);
    }

    #[test]
    fn test_convolution() {
        // 1 channel, width 5, 1 filter of kernel 3, stride 2.
        let regions = vec![
            region(0, RegionKind::Weights, 0, 3, DType::I16),
            region(1, RegionKind::Input, 64, 5, DType::I16),
            region(2, RegionKind::Accumulator, 128, 2, DType::I32),
        ];
        let m = model(
            regions.clone(),
            vec![Operation::Convolution {
                input: TensorRef::whole(1, 5),
                filters: TensorRef::whole(0, 3),
                biases: None,
                output: TensorRef::whole(2, 2),
                in_channels: 1,
                width: 5,
                num_filters: 1,
                kernel: 3,
                stride: 2,
            }],
        );
        let mut arena = vec![0u8; 4096];
        put(&mut arena, &regions[0], &[1, 0, -1]);
        put(&mut arena, &regions[1], &[5, 4, 3, 2, 1]);
        run(&mut arena, &m).unwrap();
        assert_eq!(get(&arena, &regions[2]), vec![2, 2]);
    }

    #[test]
    fn test_pooling() {
        let regions = vec![
            region(0, RegionKind::Input, 0, 8, DType::I16),
            region(1, RegionKind::Activation, 64, 4, DType::I16),
            region(2, RegionKind::Activation, 128, 4, DType::I16),
        ];
        let pool = |kind, output| Operation::Pooling {
            input: TensorRef::whole(0, 8),
            output: TensorRef::whole(output, 4),
            kind,
            channels: 2,
            width: 4,
            window: 2,
            stride: 2,
        };
        let m = model(
            regions.clone(),
            vec![pool(PoolingKind::Max, 1), pool(PoolingKind::Avg, 2)],
        );
        let mut arena = vec![0u8; 4096];
        put(&mut arena, &regions[0], &[1, 4, -3, -2, 7, 7, 0, 5]);
        run(&mut arena, &m).unwrap();
        assert_eq!(get(&arena, &regions[1]), vec![4, -2, 7, 5]);
        // (1+4)/2 = 2.5 -> 3, (-5)/2 -> -3.
        assert_eq!(get(&arena, &regions[2]), vec![3, -3, 7, 3]);
    }

    #[test]
    fn test_eltwise_and_pwl() {
        let regions = vec![
            region(0, RegionKind::Input, 0, 2, DType::I16),
            region(1, RegionKind::Input, 64, 2, DType::I16),
            region(2, RegionKind::Accumulator, 128, 2, DType::I32),
            region(3, RegionKind::Activation, 192, 2, DType::I16),
        ];
        let relu = vec![
            FixedPwlSegment {
                x_base: -100,
                y_base: 0,
                slope: 0,
                shift: 0,
            },
            FixedPwlSegment {
                x_base: 0,
                y_base: 0,
                slope: 1,
                shift: 1,
            },
        ];
        let m = model(
            regions.clone(),
            vec![
                Operation::Eltwise {
                    op: EltwiseOp::Sum,
                    a: TensorRef::whole(0, 2),
                    b: TensorRef::whole(1, 2),
                    output: TensorRef::whole(2, 2),
                    multipliers: vec![2, 1],
                },
                Operation::Pwl {
                    input: TensorRef::whole(2, 2),
                    output: TensorRef::whole(3, 2),
                    segments: relu,
                },
            ],
        );
        let mut arena = vec![0u8; 4096];
        put(&mut arena, &regions[0], &[10, -10]);
        put(&mut arena, &regions[1], &[1, 1]);
        run(&mut arena, &m).unwrap();
        assert_eq!(get(&arena, &regions[2]), vec![21, -19]);
        assert_eq!(get(&arena, &regions[3]), vec![11, 0]);
    }

    #[test]
    fn test_copy_rescale_and_view() {
        let regions = vec![
            region(0, RegionKind::Input, 0, 4, DType::I16),
            region(1, RegionKind::Activation, 64, 2, DType::I16),
        ];
        let m = model(
            regions.clone(),
            vec![Operation::Copy {
                input: TensorRef {
                    region: 0,
                    offset: 4,
                    len: 2,
                },
                output: TensorRef::whole(1, 2),
                rescale: Some(Rescale {
                    multiplier: 1,
                    shift: 1,
                }),
            }],
        );
        let mut arena = vec![0u8; 4096];
        put(&mut arena, &regions[0], &[0, 0, 100, -7]);
        run(&mut arena, &m).unwrap();
        assert_eq!(get(&arena, &regions[1]), vec![50, -3]);
    }

    #[test]
    fn test_out_of_region_faults() {
        let regions = vec![
            region(0, RegionKind::Input, 0, 2, DType::I16),
            region(1, RegionKind::Activation, 64, 2, DType::I16),
        ];
        let m = model(
            regions,
            vec![Operation::Copy {
                input: TensorRef::whole(0, 3),
                output: TensorRef::whole(1, 3),
                rescale: None,
            }],
        );
        let mut arena = vec![0u8; 4096];
        let err = run(&mut arena, &m).unwrap_err();
        assert!(err.starts_with("copy:"));
    }

    #[test]
    fn test_div_round() {
        assert_eq!(div_round(5, 2), 3);
        assert_eq!(div_round(-5, 2), -3);
        assert_eq!(div_round(4, 3), 1);
        assert_eq!(div_round(1, 0), 0);
    }
}
