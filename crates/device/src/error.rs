// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the accelerator API.

/// Errors reported by an accelerator backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The backend did not respond to `open`.
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// An operation was attempted before `open` or after `close`.
    #[error("device is not open")]
    NotOpen,

    /// The requested arena would exceed device memory.
    #[error("out of device memory: requested {requested_bytes} bytes, {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: u64,
        available_bytes: u64,
        budget_bytes: u64,
    },

    #[error("cannot allocate a zero-sized arena")]
    ZeroSizedAllocation,

    /// A memory budget string could not be parsed.
    #[error("invalid memory budget: {0}")]
    InvalidBudget(String),

    #[error("unknown arena {0}")]
    UnknownArena(u64),

    #[error("unknown request {0}")]
    UnknownRequest(u64),

    /// A host access fell outside an arena.
    #[error("access of {len} bytes at offset {offset} outside arena {arena} of {size} bytes")]
    OutOfBounds {
        arena: u64,
        offset: u64,
        len: u64,
        size: u64,
    },

    /// The hardware reported a fault while executing a request.
    #[error("device fault: {0}")]
    Fault(String),
}
