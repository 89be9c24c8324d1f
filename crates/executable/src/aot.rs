// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ahead-of-time model files.
//!
//! # Format
//!
//! All integers little-endian.
//!
//! ```text
//! version     u32
//! model_size  u64   bytes of body that follow
//! body:
//!   name                     string
//!   arena_size               u64
//!   regions                  u32 count, then {id u32, kind u8, dtype u8, offset u64, size u64, name string}
//!   parameter image          u64 length, then bytes
//!   instructions             u32 count, then {layer string, origin u8, op}
//!   inputs, outputs          u32 count, then tensor descriptors
//!   states                   u32 count, then {name, shape, dtype u8, scale f64, region u32}
//!   scale table              u32 count, then {layer string, scale f64, dtype u8}
//! string = u32 length + UTF-8 bytes
//! ```
//!
//! The version is checked before anything else is read.

use crate::model::{
    ExecutableModel, Instruction, MemoryRegion, Operation, RegionKind, ScaleEntry,
    StateDescriptor, TensorDescriptor, TensorRef,
};
use crate::AotError;
use memmap2::Mmap;
use model_ir::{EltwiseOp, FixedPwlSegment, Origin, PoolingKind, Rescale};
use std::fs::File;
use std::path::Path;
use tensor_core::{DType, Shape};

/// Current AOT format version.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 8;

const OP_AFFINE: u8 = 0;
const OP_DIAGONAL: u8 = 1;
const OP_CONVOLUTION: u8 = 2;
const OP_POOLING: u8 = 3;
const OP_ELTWISE: u8 = 4;
const OP_PWL: u8 = 5;
const OP_COPY: u8 = 6;

// ── Writing ────────────────────────────────────────────────────────

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn shape(&mut self, shape: &Shape) {
        self.u32(shape.rank() as u32);
        for d in shape.dims() {
            self.u64(*d as u64);
        }
    }

    fn tensor(&mut self, t: &TensorRef) {
        self.u32(t.region);
        self.u64(t.offset);
        self.u64(t.len);
    }

    fn opt_tensor(&mut self, t: &Option<TensorRef>) {
        match t {
            Some(t) => {
                self.u8(1);
                self.tensor(t);
            }
            None => self.u8(0),
        }
    }

    fn descriptor(&mut self, d: &TensorDescriptor) {
        self.str(&d.name);
        self.shape(&d.shape);
        self.u8(d.dtype.tag());
        self.f64(d.scale);
        self.tensor(&d.tensor);
    }

    fn op(&mut self, op: &Operation) {
        match op {
            Operation::Affine {
                input,
                weights,
                biases,
                output,
                rows,
                cols,
            } => {
                self.u8(OP_AFFINE);
                self.tensor(input);
                self.tensor(weights);
                self.opt_tensor(biases);
                self.tensor(output);
                self.u32(*rows);
                self.u32(*cols);
            }
            Operation::Diagonal {
                input,
                weights,
                biases,
                output,
            } => {
                self.u8(OP_DIAGONAL);
                self.tensor(input);
                self.tensor(weights);
                self.opt_tensor(biases);
                self.tensor(output);
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
                self.u8(OP_CONVOLUTION);
                self.tensor(input);
                self.tensor(filters);
                self.opt_tensor(biases);
                self.tensor(output);
                for v in [in_channels, width, num_filters, kernel, stride] {
                    self.u32(*v);
                }
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
                self.u8(OP_POOLING);
                self.tensor(input);
                self.tensor(output);
                self.u8(match kind {
                    PoolingKind::Max => 0,
                    PoolingKind::Avg => 1,
                });
                for v in [channels, width, window, stride] {
                    self.u32(*v);
                }
            }
            Operation::Eltwise {
                op,
                a,
                b,
                output,
                multipliers,
            } => {
                self.u8(OP_ELTWISE);
                self.u8(match op {
                    EltwiseOp::Sum => 0,
                    EltwiseOp::Prod => 1,
                });
                self.tensor(a);
                self.tensor(b);
                self.tensor(output);
                self.u32(multipliers.len() as u32);
                for m in multipliers {
                    self.i32(*m);
                }
            }
            Operation::Pwl {
                input,
                output,
                segments,
            } => {
                self.u8(OP_PWL);
                self.tensor(input);
                self.tensor(output);
                self.u32(segments.len() as u32);
                for s in segments {
                    self.i32(s.x_base);
                    self.buf.extend_from_slice(&s.y_base.to_le_bytes());
                    self.buf.extend_from_slice(&s.slope.to_le_bytes());
                    self.u8(s.shift);
                }
            }
            Operation::Copy {
                input,
                output,
                rescale,
            } => {
                self.u8(OP_COPY);
                self.tensor(input);
                self.tensor(output);
                match rescale {
                    Some(r) => {
                        self.u8(1);
                        self.i32(r.multiplier);
                        self.u8(r.shift);
                    }
                    None => self.u8(0),
                }
            }
        }
    }
}

/// Encodes a model into the AOT format.
pub fn serialize(model: &ExecutableModel) -> Vec<u8> {
    let mut w = Writer::default();
    w.str(&model.name);
    w.u64(model.arena_size);

    w.u32(model.regions.len() as u32);
    for r in &model.regions {
        w.u32(r.id);
        w.u8(r.kind.tag());
        w.u8(r.dtype.tag());
        w.u64(r.offset);
        w.u64(r.size);
        w.str(&r.name);
    }

    w.u64(model.parameters.len() as u64);
    w.buf.extend_from_slice(&model.parameters);

    w.u32(model.instructions.len() as u32);
    for inst in &model.instructions {
        w.str(&inst.layer);
        w.u8(inst.origin.tag());
        w.op(&inst.op);
    }

    for list in [&model.inputs, &model.outputs] {
        w.u32(list.len() as u32);
        for d in list {
            w.descriptor(d);
        }
    }

    w.u32(model.states.len() as u32);
    for s in &model.states {
        w.str(&s.name);
        w.shape(&s.shape);
        w.u8(s.dtype.tag());
        w.f64(s.scale);
        w.u32(s.region);
    }

    w.u32(model.scales.len() as u32);
    for s in &model.scales {
        w.str(&s.layer);
        w.f64(s.scale);
        w.u8(s.dtype.tag());
    }

    let body = w.buf;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

// ── Reading ────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AotError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                AotError::Corrupt(format!(
                    "truncated: need {} bytes at offset {}, {} available",
                    n,
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], AotError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, AotError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, AotError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, AotError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, AotError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, AotError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, AotError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Reads an element count, rejecting counts the remaining bytes cannot
    /// hold (each element takes at least `min_size` bytes).
    fn count(&mut self, min_size: usize) -> Result<usize, AotError> {
        let n = self.u32()? as usize;
        let remaining = self.data.len() - self.pos;
        if n.saturating_mul(min_size.max(1)) > remaining {
            return Err(AotError::Corrupt(format!(
                "count {n} at offset {} exceeds remaining data",
                self.pos - 4
            )));
        }
        Ok(n)
    }

    fn str(&mut self) -> Result<String, AotError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AotError::Corrupt(format!("invalid UTF-8 string: {e}")))
    }

    fn dtype(&mut self) -> Result<DType, AotError> {
        let tag = self.u8()?;
        DType::from_tag(tag).ok_or_else(|| AotError::Corrupt(format!("unknown dtype tag {tag}")))
    }

    fn shape(&mut self) -> Result<Shape, AotError> {
        let rank = self.count(8)?;
        let dims = (0..rank)
            .map(|_| self.u64().map(|d| d as usize))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Shape::new(dims))
    }

    fn tensor(&mut self) -> Result<TensorRef, AotError> {
        Ok(TensorRef {
            region: self.u32()?,
            offset: self.u64()?,
            len: self.u64()?,
        })
    }

    fn opt_tensor(&mut self) -> Result<Option<TensorRef>, AotError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.tensor()?)),
            flag => Err(AotError::Corrupt(format!("invalid option flag {flag}"))),
        }
    }

    fn descriptor(&mut self) -> Result<TensorDescriptor, AotError> {
        Ok(TensorDescriptor {
            name: self.str()?,
            shape: self.shape()?,
            dtype: self.dtype()?,
            scale: self.f64()?,
            tensor: self.tensor()?,
        })
    }

    fn op(&mut self) -> Result<Operation, AotError> {
        let tag = self.u8()?;
        let op = match tag {
            OP_AFFINE => Operation::Affine {
                input: self.tensor()?,
                weights: self.tensor()?,
                biases: self.opt_tensor()?,
                output: self.tensor()?,
                rows: self.u32()?,
                cols: self.u32()?,
            },
            OP_DIAGONAL => Operation::Diagonal {
                input: self.tensor()?,
                weights: self.tensor()?,
                biases: self.opt_tensor()?,
                output: self.tensor()?,
            },
            OP_CONVOLUTION => Operation::Convolution {
                input: self.tensor()?,
                filters: self.tensor()?,
                biases: self.opt_tensor()?,
                output: self.tensor()?,
                in_channels: self.u32()?,
                width: self.u32()?,
                num_filters: self.u32()?,
                kernel: self.u32()?,
                stride: self.u32()?,
            },
            OP_POOLING => Operation::Pooling {
                input: self.tensor()?,
                output: self.tensor()?,
                kind: match self.u8()? {
                    0 => PoolingKind::Max,
                    1 => PoolingKind::Avg,
                    k => return Err(AotError::Corrupt(format!("unknown pooling kind {k}"))),
                },
                channels: self.u32()?,
                width: self.u32()?,
                window: self.u32()?,
                stride: self.u32()?,
            },
            OP_ELTWISE => {
                let op = match self.u8()? {
                    0 => EltwiseOp::Sum,
                    1 => EltwiseOp::Prod,
                    k => return Err(AotError::Corrupt(format!("unknown eltwise op {k}"))),
                };
                let a = self.tensor()?;
                let b = self.tensor()?;
                let output = self.tensor()?;
                let n = self.count(4)?;
                let multipliers = (0..n).map(|_| self.i32()).collect::<Result<_, _>>()?;
                Operation::Eltwise {
                    op,
                    a,
                    b,
                    output,
                    multipliers,
                }
            }
            OP_PWL => {
                let input = self.tensor()?;
                let output = self.tensor()?;
                let n = self.count(9)?;
                let segments = (0..n)
                    .map(|_| {
                        Ok(FixedPwlSegment {
                            x_base: self.i32()?,
                            y_base: self.i16()?,
                            slope: self.i16()?,
                            shift: self.u8()?,
                        })
                    })
                    .collect::<Result<_, AotError>>()?;
                Operation::Pwl {
                    input,
                    output,
                    segments,
                }
            }
            OP_COPY => {
                let input = self.tensor()?;
                let output = self.tensor()?;
                let rescale = match self.u8()? {
                    0 => None,
                    1 => Some(Rescale {
                        multiplier: self.i32()?,
                        shift: self.u8()?,
                    }),
                    flag => return Err(AotError::Corrupt(format!("invalid option flag {flag}"))),
                };
                Operation::Copy {
                    input,
                    output,
                    rescale,
                }
            }
            _ => return Err(AotError::Corrupt(format!("unknown operation tag {tag}"))),
        };
        Ok(op)
    }
}

/// Decodes an AOT image.
pub fn deserialize(data: &[u8]) -> Result<ExecutableModel, AotError> {
    if data.len() < 4 {
        return Err(AotError::Corrupt(format!(
            "{} bytes is too short for a header",
            data.len()
        )));
    }
    let mut header = Reader { data, pos: 0 };
    let version = header.u32()?;
    if version != FORMAT_VERSION {
        return Err(AotError::UnsupportedFormatVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let model_size = header.u64()?;
    let body_len = (data.len() - HEADER_LEN) as u64;
    if model_size > body_len {
        return Err(AotError::Corrupt(format!(
            "truncated: header declares {model_size} bytes, {body_len} present"
        )));
    }
    if model_size < body_len {
        return Err(AotError::Corrupt(format!(
            "{} trailing bytes after model",
            body_len - model_size
        )));
    }

    let mut r = Reader {
        data: &data[HEADER_LEN..],
        pos: 0,
    };
    let name = r.str()?;
    let arena_size = r.u64()?;

    let n = r.count(26)?;
    let mut regions = Vec::with_capacity(n);
    for _ in 0..n {
        let id = r.u32()?;
        let tag = r.u8()?;
        let kind = RegionKind::from_tag(tag)
            .ok_or_else(|| AotError::Corrupt(format!("unknown region kind {tag}")))?;
        regions.push(MemoryRegion {
            id,
            kind,
            dtype: r.dtype()?,
            offset: r.u64()?,
            size: r.u64()?,
            name: r.str()?,
        });
    }

    let param_len = r.u64()?;
    let parameters = r.take(param_len as usize)?.to_vec();

    let n = r.count(6)?;
    let mut instructions = Vec::with_capacity(n);
    for _ in 0..n {
        let layer = r.str()?;
        let tag = r.u8()?;
        let origin =
            Origin::from_tag(tag).ok_or_else(|| AotError::Corrupt(format!("unknown origin {tag}")))?;
        instructions.push(Instruction {
            layer,
            origin,
            op: r.op()?,
        });
    }

    let mut lists = Vec::with_capacity(2);
    for _ in 0..2 {
        let n = r.count(33)?;
        lists.push((0..n).map(|_| r.descriptor()).collect::<Result<Vec<_>, _>>()?);
    }
    let outputs = lists.pop().unwrap_or_default();
    let inputs = lists.pop().unwrap_or_default();

    let n = r.count(21)?;
    let mut states = Vec::with_capacity(n);
    for _ in 0..n {
        states.push(StateDescriptor {
            name: r.str()?,
            shape: r.shape()?,
            dtype: r.dtype()?,
            scale: r.f64()?,
            region: r.u32()?,
        });
    }

    let n = r.count(13)?;
    let mut scales = Vec::with_capacity(n);
    for _ in 0..n {
        scales.push(ScaleEntry {
            layer: r.str()?,
            scale: r.f64()?,
            dtype: r.dtype()?,
        });
    }

    if r.pos != r.data.len() {
        return Err(AotError::Corrupt(format!(
            "{} unread bytes inside the model body",
            r.data.len() - r.pos
        )));
    }

    let model = ExecutableModel {
        name,
        regions,
        arena_size,
        parameters,
        instructions,
        inputs,
        outputs,
        states,
        scales,
    };
    model.check_layout().map_err(AotError::Corrupt)?;
    Ok(model)
}

/// Writes `model` to `path`.
pub fn export(model: &ExecutableModel, path: &Path) -> Result<(), AotError> {
    let bytes = serialize(model);
    std::fs::write(path, &bytes)?;
    tracing::info!(
        model = %model.name,
        path = %path.display(),
        bytes = bytes.len(),
        "exported AOT model"
    );
    Ok(())
}

/// Reads a model from `path` through a memory map.
pub fn import(path: &Path) -> Result<ExecutableModel, AotError> {
    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning; the file is
    // not expected to be modified while it is being decoded.
    let mmap = unsafe { Mmap::map(&file)? };
    let model = deserialize(&mmap)?;
    tracing::info!(
        model = %model.name,
        path = %path.display(),
        instructions = model.instructions.len(),
        "imported AOT model"
    );
    Ok(model)
}
