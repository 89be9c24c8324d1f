// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Compiles source graphs for the fixed-point accelerator and runs them.
//!
//! The runtime takes:
//! - A validated `Graph` from `model-ir`.
//! - Hardware limits and a precision configuration from [`RuntimeConfig`].
//! - An accelerator backend implementing `device::Accelerator`.
//!
//! Compilation runs the `graph-transform` pipeline, quantizes with
//! `quantizer` and lays out the model with `executable`. The resulting
//! model is loaded into a device arena and executed through a
//! [`DeviceContext`], which quantizes inputs, waits with a timeout and
//! dequantizes outputs.
//!
//! # Type-State Lifecycle
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Ready> → InferenceEngine<Idle>
//! ```
//! Transitions are compile-time checked.
//!
//! # Threading
//! A `DeviceContext` is `Send` but not shared; drive each context from one
//! thread at a time. [`compile`] touches no device state.

mod compile;
mod config;
mod device_context;
mod engine;
mod error;
mod metrics;
mod state;

pub use compile::{compile, Compilation};
pub use config::RuntimeConfig;
pub use device_context::{DeviceContext, ModelHandle, SessionOptions};
pub use engine::{dump_file, EngineState, Idle, InferenceEngine, Ready};
pub use error::{ErrorKind, RuntimeError};
pub use metrics::{ModelProfile, PerfRecord};
pub use state::StateHandle;
