// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Float reference operations.
//!
//! The accelerator never evaluates these directly: they are the ground
//! truth the compiler fits piecewise-linear segments against and the
//! reference that tests compare device outputs with.

mod activation_op;

pub use activation_op::{leaky_relu, relu, sigmoid, tanh};
