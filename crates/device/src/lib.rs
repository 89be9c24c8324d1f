// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device
//!
//! The accelerator seen from the host: a memory budget split into arenas,
//! and the [`Allocator`] / [`Submitter`] / [`Waiter`] / [`Accelerator`]
//! traits the runtime programs against.
//!
//! Two backends are provided:
//!
//! - [`SimulatedAccelerator`]: executes the instruction stream bit-exactly
//!   in software and reports simulated cycle counts.
//! - [`FakeAccelerator`]: wraps the simulator with injectable failures
//!   (unavailable device, over-granted memory, hangs, faults) and records
//!   every call.
//!
//! ```
//! use device::{Accelerator, Allocator, MemoryBudget, SimulatedAccelerator};
//!
//! let mut dev = SimulatedAccelerator::new(MemoryBudget::parse("1MB").unwrap(), 4096);
//! dev.open().unwrap();
//! let grant = dev.allocate(1000).unwrap();
//! assert!(grant.granted >= grant.requested);
//! dev.close();
//! ```

mod api;
mod arena;
mod budget;
mod error;
mod exec;
pub mod fake;
pub mod simulator;
mod stats;

pub use api::{
    Accelerator, Allocator, Capabilities, ExecutionMode, PerfCounters, RequestId, SubmitRequest,
    Submitter, WaitStatus, Waiter,
};
pub use arena::{ArenaHandle, DeviceMemory, Grant};
pub use budget::MemoryBudget;
pub use error::DeviceError;
pub use fake::{Call, FakeAccelerator, FakeControl};
pub use simulator::SimulatedAccelerator;
pub use stats::DeviceStats;
