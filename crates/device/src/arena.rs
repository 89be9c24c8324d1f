// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced device memory.
//!
//! [`DeviceMemory`] hands out zeroed arenas whose size is the request
//! rounded up to the allocation granularity, so the granted size is never
//! smaller than the requested one. The sum of all granted sizes never
//! exceeds the [`MemoryBudget`].

use crate::{DeviceError, DeviceStats, MemoryBudget};
use std::collections::HashMap;
use std::fmt;

/// Opaque identifier of a device arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaHandle(pub u64);

impl fmt::Display for ArenaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub handle: ArenaHandle,
    pub requested: u64,
    /// Bytes actually reserved; all addressing must use this size.
    pub granted: u64,
}

/// Host-visible device memory, partitioned into arenas.
pub struct DeviceMemory {
    budget: MemoryBudget,
    granularity: u64,
    arenas: HashMap<u64, Vec<u8>>,
    next_handle: u64,
    stats: DeviceStats,
}

impl DeviceMemory {
    pub fn new(budget: MemoryBudget, granularity: u64) -> Self {
        Self {
            budget,
            granularity: granularity.max(1),
            arenas: HashMap::new(),
            next_handle: 1,
            stats: DeviceStats::default(),
        }
    }

    /// Reserves a zeroed arena of at least `requested` bytes, plus
    /// `extra` bytes of slack.
    pub fn allocate(&mut self, requested: u64, extra: u64) -> Result<Grant, DeviceError> {
        if requested == 0 {
            return Err(DeviceError::ZeroSizedAllocation);
        }
        let granted = requested.div_ceil(self.granularity) * self.granularity + extra;
        let budget = self.budget.as_bytes();
        let in_use = self.allocated_bytes();
        if in_use + granted > budget {
            self.stats.record_oom();
            return Err(DeviceError::OutOfMemory {
                requested_bytes: granted,
                available_bytes: budget.saturating_sub(in_use),
                budget_bytes: budget,
            });
        }

        let handle = ArenaHandle(self.next_handle);
        self.next_handle += 1;
        self.arenas.insert(handle.0, vec![0u8; granted as usize]);
        self.stats.record_grant(granted);
        tracing::debug!(%handle, requested, granted, "arena allocated");
        Ok(Grant {
            handle,
            requested,
            granted,
        })
    }

    pub fn free(&mut self, handle: ArenaHandle) -> Result<(), DeviceError> {
        let arena = self
            .arenas
            .remove(&handle.0)
            .ok_or(DeviceError::UnknownArena(handle.0))?;
        self.stats.record_free(arena.len() as u64);
        tracing::debug!(%handle, bytes = arena.len(), "arena freed");
        Ok(())
    }

    /// Frees every arena.
    pub fn clear(&mut self) {
        let handles: Vec<u64> = self.arenas.keys().copied().collect();
        for h in handles {
            let _ = self.free(ArenaHandle(h));
        }
    }

    pub fn arena(&self, handle: ArenaHandle) -> Result<&[u8], DeviceError> {
        self.arenas
            .get(&handle.0)
            .map(Vec::as_slice)
            .ok_or(DeviceError::UnknownArena(handle.0))
    }

    pub fn arena_mut(&mut self, handle: ArenaHandle) -> Result<&mut [u8], DeviceError> {
        self.arenas
            .get_mut(&handle.0)
            .map(Vec::as_mut_slice)
            .ok_or(DeviceError::UnknownArena(handle.0))
    }

    /// Copies `bytes` into an arena at `offset`.
    pub fn write(&mut self, handle: ArenaHandle, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let arena = self.arena_mut(handle)?;
        let range = checked_range(handle, arena.len(), offset, bytes.len())?;
        arena[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `len` bytes out of an arena.
    pub fn read(&self, handle: ArenaHandle, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError> {
        let arena = self.arena(handle)?;
        let range = checked_range(handle, arena.len(), offset, len)?;
        Ok(arena[range].to_vec())
    }

    /// Zeroes `len` bytes of an arena.
    pub fn zero(&mut self, handle: ArenaHandle, offset: u64, len: usize) -> Result<(), DeviceError> {
        let arena = self.arena_mut(handle)?;
        let range = checked_range(handle, arena.len(), offset, len)?;
        arena[range].fill(0);
        Ok(())
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.arenas.values().map(|a| a.len() as u64).sum()
    }

    pub fn available_bytes(&self) -> u64 {
        self.budget.as_bytes().saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    pub fn num_arenas(&self) -> usize {
        self.arenas.len()
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DeviceStats {
        &mut self.stats
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("budget", &self.budget)
            .field("arenas", &self.arenas.len())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

fn checked_range(
    handle: ArenaHandle,
    size: usize,
    offset: u64,
    len: usize,
) -> Result<std::ops::Range<usize>, DeviceError> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(DeviceError::OutOfBounds {
            arena: handle.0,
            offset,
            len: len as u64,
            size: size as u64,
        }),
    }
}
