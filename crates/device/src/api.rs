// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The hardware API the runtime programs against.
//!
//! An accelerator is split into the capabilities the runtime uses at
//! different points of a model's life:
//!
//! | Trait | Used for |
//! |---|---|
//! | [`Allocator`] | reserving and addressing arenas at load time |
//! | [`Submitter`] | queueing one inference |
//! | [`Waiter`] | blocking until the inference completes |
//! | [`Accelerator`] | opening, closing, capabilities and native dumps |

use crate::{ArenaHandle, DeviceError, Grant, MemoryBudget};
use executable::ExecutableModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the accelerator should execute a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// The hardware engine.
    Hardware,
    /// A bit-exact software emulation of the engine.
    SoftwareExact,
    /// Hardware when present, otherwise the bit-exact emulation.
    #[default]
    Auto,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::SoftwareExact => "software-exact",
            Self::Auto => "auto",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "hardware" | "hw" => Some(Self::Hardware),
            "software-exact" | "software" | "sw" | "exact" => Some(Self::SoftwareExact),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// One inference to execute against a loaded arena.
#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'a> {
    pub arena: ArenaHandle,
    pub model: &'a ExecutableModel,
    pub mode: ExecutionMode,
    /// Collect per-instruction cycle counts.
    pub profiling: bool,
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Completed,
    /// The request did not complete within the timeout.
    TimedOut,
}

/// Timing reported by [`Waiter::wait_with_perf`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub total_cycles: u64,
    /// Cycles per instruction, in stream order.
    pub instruction_cycles: Vec<u64>,
    /// Host time from submission to completion.
    pub elapsed: Duration,
}

/// Static properties of an accelerator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    pub name: String,
    pub memory: MemoryBudget,
    pub allocation_granularity: u64,
    pub alignment_bytes: u64,
    pub supports_profiling: bool,
    pub modes: Vec<ExecutionMode>,
}

pub trait Allocator {
    /// Reserves an arena of at least `size` bytes.
    fn allocate(&mut self, size: u64) -> Result<Grant, DeviceError>;

    fn free(&mut self, arena: ArenaHandle) -> Result<(), DeviceError>;

    /// Copies host bytes into an arena.
    fn write(&mut self, arena: ArenaHandle, offset: u64, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Copies bytes out of an arena.
    fn read(&self, arena: ArenaHandle, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError>;
}

pub trait Submitter {
    fn submit(&mut self, request: SubmitRequest<'_>) -> Result<RequestId, DeviceError>;
}

pub trait Waiter {
    /// Blocks until `request` completes or `timeout` elapses. A hardware
    /// fault is reported as [`DeviceError::Fault`].
    fn wait(&mut self, request: RequestId, timeout: Duration) -> Result<WaitStatus, DeviceError>;

    /// Like [`Waiter::wait`], also returning performance counters. Only
    /// meaningful for requests submitted with profiling enabled.
    fn wait_with_perf(
        &mut self,
        request: RequestId,
        timeout: Duration,
    ) -> Result<(WaitStatus, PerfCounters), DeviceError>;
}

/// A complete accelerator backend.
pub trait Accelerator: Allocator + Submitter + Waiter + Send {
    /// Opens the device. Fails with [`DeviceError::Unavailable`] when the
    /// backend does not respond.
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Closes the device and releases every arena. Idempotent.
    fn close(&mut self);

    fn capabilities(&self) -> Capabilities;

    /// Produces the backend's native description of a loaded model.
    fn dump(&mut self, arena: ArenaHandle, model: &ExecutableModel) -> Result<Vec<u8>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ExecutionMode::from_str_loose("HW"), Some(ExecutionMode::Hardware));
        assert_eq!(
            ExecutionMode::from_str_loose("software_exact"),
            Some(ExecutionMode::SoftwareExact)
        );
        assert_eq!(ExecutionMode::from_str_loose("auto"), Some(ExecutionMode::Auto));
        assert_eq!(ExecutionMode::from_str_loose("gpu"), None);
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&ExecutionMode::SoftwareExact).unwrap();
        assert_eq!(json, "\"software-exact\"");
        let back: ExecutionMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExecutionMode::SoftwareExact);
        assert_eq!(ExecutionMode::default(), ExecutionMode::Auto);
    }
}
