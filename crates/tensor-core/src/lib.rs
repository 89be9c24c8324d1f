// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Shared numeric vocabulary for the fixed-point accelerator toolchain.
//!
//! This crate provides:
//! - [`Shape`] — ordered tensor dimensions (batch, channels, spatial…).
//! - [`DType`] — element types: `f32` on the host side, `i8`/`i16`/`i32`
//!   on the device side.
//! - [`Tensor`] — an owned host-side `f32` tensor used for inference inputs
//!   and outputs.
//! - [`fixed`] — rounding and saturation helpers shared by the quantizer,
//!   the simulated accelerator and the runtime.
//! - [`ops`] — float reference implementations of the activation functions
//!   the compiler approximates.

mod dtype;
mod error;
pub mod fixed;
pub mod ops;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::Tensor;
