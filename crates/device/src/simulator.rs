// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cycle-counting software model of the accelerator.
//!
//! Requests execute synchronously inside [`Submitter::submit`]; the result
//! is parked until the matching wait. Both execution modes run the same
//! bit-exact integer interpreter, so hardware and software-exact results
//! are identical by construction.

use crate::api::{
    Accelerator, Allocator, Capabilities, ExecutionMode, PerfCounters, RequestId, SubmitRequest,
    Submitter, WaitStatus, Waiter,
};
use crate::{exec, ArenaHandle, DeviceError, DeviceMemory, DeviceStats, Grant, MemoryBudget};
use executable::ExecutableModel;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Magic prefix of a native dump.
pub const DUMP_MAGIC: &[u8; 8] = b"FXNATIVE";

/// Default allocation granularity in bytes.
pub const DEFAULT_GRANULARITY: u64 = 4096;

/// Default alignment of regions inside an arena.
pub const DEFAULT_ALIGNMENT: u64 = 64;

#[derive(Debug)]
enum Completion {
    Done(PerfCounters),
    Faulted(String),
}

/// Software accelerator with a fixed memory budget.
#[derive(Debug)]
pub struct SimulatedAccelerator {
    memory: DeviceMemory,
    alignment: u64,
    opened: bool,
    pending: HashMap<u64, Completion>,
    next_request: u64,
    last_mode: Option<ExecutionMode>,
}

impl SimulatedAccelerator {
    pub fn new(budget: MemoryBudget, granularity: u64) -> Self {
        Self {
            memory: DeviceMemory::new(budget, granularity),
            alignment: DEFAULT_ALIGNMENT,
            opened: false,
            pending: HashMap::new(),
            next_request: 1,
            last_mode: None,
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// The mode the last request actually ran in; `Auto` resolves to
    /// `Hardware`.
    pub fn last_mode(&self) -> Option<ExecutionMode> {
        self.last_mode
    }

    pub fn stats(&self) -> &DeviceStats {
        self.memory.stats()
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut DeviceMemory {
        &mut self.memory
    }

    /// Number of submitted requests not yet waited for.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Submits a request whose completion is a fault, without executing it.
    pub(crate) fn submit_faulted(&mut self, reason: &str) -> Result<RequestId, DeviceError> {
        self.ensure_open()?;
        let id = self.next_id();
        self.memory.stats_mut().submissions += 1;
        self.pending.insert(id.0, Completion::Faulted(reason.to_string()));
        Ok(id)
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.opened {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    fn complete(&mut self, request: RequestId) -> Result<PerfCounters, DeviceError> {
        self.ensure_open()?;
        match self.pending.remove(&request.0) {
            Some(Completion::Done(perf)) => {
                let stats = self.memory.stats_mut();
                stats.completions += 1;
                stats.total_cycles += perf.total_cycles;
                Ok(perf)
            }
            Some(Completion::Faulted(reason)) => {
                self.memory.stats_mut().faults += 1;
                tracing::warn!(request = request.0, %reason, "request faulted");
                Err(DeviceError::Fault(reason))
            }
            None => Err(DeviceError::UnknownRequest(request.0)),
        }
    }
}

impl Default for SimulatedAccelerator {
    fn default() -> Self {
        Self::new(MemoryBudget::from_mb(64), DEFAULT_GRANULARITY)
    }
}

impl Allocator for SimulatedAccelerator {
    fn allocate(&mut self, size: u64) -> Result<Grant, DeviceError> {
        self.ensure_open()?;
        self.memory.allocate(size, 0)
    }

    fn free(&mut self, arena: ArenaHandle) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.memory.free(arena)
    }

    fn write(&mut self, arena: ArenaHandle, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.memory.write(arena, offset, bytes)
    }

    fn read(&self, arena: ArenaHandle, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.ensure_open()?;
        self.memory.read(arena, offset, len)
    }
}

impl Submitter for SimulatedAccelerator {
    fn submit(&mut self, request: SubmitRequest<'_>) -> Result<RequestId, DeviceError> {
        self.ensure_open()?;
        let mode = match request.mode {
            ExecutionMode::Auto => ExecutionMode::Hardware,
            m => m,
        };
        let model = request.model;
        let arena = self.memory.arena_mut(request.arena)?;
        if (arena.len() as u64) < model.arena_size {
            return Err(DeviceError::OutOfBounds {
                arena: request.arena.0,
                offset: 0,
                len: model.arena_size,
                size: arena.len() as u64,
            });
        }

        let started = Instant::now();
        let completion = match exec::run(arena, model) {
            Ok(cycles) => Completion::Done(PerfCounters {
                total_cycles: cycles.iter().sum(),
                instruction_cycles: if request.profiling { cycles } else { Vec::new() },
                elapsed: started.elapsed(),
            }),
            Err(reason) => Completion::Faulted(reason),
        };

        let id = self.next_id();
        self.memory.stats_mut().submissions += 1;
        self.last_mode = Some(mode);
        tracing::trace!(
            request = id.0,
            %mode,
            instructions = model.instructions.len(),
            "request submitted"
        );
        self.pending.insert(id.0, completion);
        Ok(id)
    }
}

impl Waiter for SimulatedAccelerator {
    fn wait(&mut self, request: RequestId, _timeout: Duration) -> Result<WaitStatus, DeviceError> {
        self.complete(request).map(|_| WaitStatus::Completed)
    }

    fn wait_with_perf(
        &mut self,
        request: RequestId,
        _timeout: Duration,
    ) -> Result<(WaitStatus, PerfCounters), DeviceError> {
        self.complete(request).map(|perf| (WaitStatus::Completed, perf))
    }
}

impl Accelerator for SimulatedAccelerator {
    fn open(&mut self) -> Result<(), DeviceError> {
        if !self.opened {
            self.opened = true;
            tracing::info!(budget = %self.memory.budget(), "simulated accelerator opened");
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.opened {
            self.memory.clear();
            self.pending.clear();
            self.opened = false;
            tracing::info!("{}", self.memory.stats().summary());
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            name: "fxsim".to_string(),
            memory: self.memory.budget(),
            allocation_granularity: self.memory.granularity(),
            alignment_bytes: self.alignment,
            supports_profiling: true,
            modes: vec![
                ExecutionMode::Hardware,
                ExecutionMode::SoftwareExact,
                ExecutionMode::Auto,
            ],
        }
    }

    /// Native dump layout, little-endian: magic, instruction count (u32),
    /// arena length (u64), arena bytes, then the textual listing.
    fn dump(&mut self, arena: ArenaHandle, model: &ExecutableModel) -> Result<Vec<u8>, DeviceError> {
        self.ensure_open()?;
        let bytes = self.memory.arena(arena)?;
        let listing = model.to_string();
        let mut out = Vec::with_capacity(20 + bytes.len() + listing.len());
        out.extend_from_slice(DUMP_MAGIC);
        out.extend_from_slice(&(model.instructions.len() as u32).to_le_bytes());
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(bytes);
        out.extend_from_slice(listing.as_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executable::{Instruction, MemoryRegion, Operation, RegionKind, TensorRef};
    use model_ir::Origin;
    use tensor_core::fixed::{decode_ints, encode_ints};
    use tensor_core::DType;

    /// in (2 x i16) -> copy -> out (2 x i16)
    fn copy_model() -> ExecutableModel {
        let region = |id, kind, offset| MemoryRegion {
            id,
            name: format!("r{id}"),
            kind,
            offset,
            size: 4,
            dtype: DType::I16,
        };
        ExecutableModel {
            name: "copy".into(),
            regions: vec![
                region(0, RegionKind::Input, 0),
                region(1, RegionKind::Activation, 64),
            ],
            arena_size: 4096,
            parameters: Vec::new(),
            instructions: vec![Instruction {
                layer: "out".into(),
                origin: Origin::Source,
                op: Operation::Copy {
                    input: TensorRef::whole(0, 2),
                    output: TensorRef::whole(1, 2),
                    rescale: None,
                },
            }],
            inputs: Vec::new(),
            outputs: Vec::new(),
            states: Vec::new(),
            scales: Vec::new(),
        }
    }

    fn opened() -> SimulatedAccelerator {
        let mut dev = SimulatedAccelerator::new(MemoryBudget::from_kb(64), 4096);
        dev.open().unwrap();
        dev
    }

    fn request(arena: ArenaHandle, model: &ExecutableModel, profiling: bool) -> SubmitRequest<'_> {
        SubmitRequest {
            arena,
            model,
            mode: ExecutionMode::Auto,
            profiling,
        }
    }

    #[test]
    fn test_requires_open() {
        let mut dev = SimulatedAccelerator::default();
        assert!(matches!(dev.allocate(16), Err(DeviceError::NotOpen)));
    }

    #[test]
    fn test_submit_and_wait() {
        let mut dev = opened();
        let model = copy_model();
        let grant = dev.allocate(model.arena_size).unwrap();
        dev.write(grant.handle, 0, &encode_ints(&[7, -3], DType::I16))
            .unwrap();

        let id = dev.submit(request(grant.handle, &model, false)).unwrap();
        assert_eq!(dev.pending_requests(), 1);
        let status = dev.wait(id, Duration::from_secs(1)).unwrap();
        assert_eq!(status, WaitStatus::Completed);
        assert_eq!(dev.last_mode(), Some(ExecutionMode::Hardware));

        let out = dev.read(grant.handle, 64, 4).unwrap();
        assert_eq!(decode_ints(&out, DType::I16), vec![7, -3]);
        assert_eq!(dev.stats().completions, 1);
        assert!(matches!(
            dev.wait(id, Duration::from_secs(1)),
            Err(DeviceError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_perf_counters() {
        let mut dev = opened();
        let model = copy_model();
        let grant = dev.allocate(model.arena_size).unwrap();
        let id = dev.submit(request(grant.handle, &model, true)).unwrap();
        let (_, perf) = dev.wait_with_perf(id, Duration::from_secs(1)).unwrap();
        assert_eq!(perf.instruction_cycles.len(), 1);
        assert_eq!(perf.total_cycles, perf.instruction_cycles[0]);
        assert!(perf.total_cycles > 0);
    }

    #[test]
    fn test_fault_reported_on_wait() {
        let mut dev = opened();
        let mut model = copy_model();
        model.instructions[0].op = Operation::Copy {
            input: TensorRef::whole(0, 3),
            output: TensorRef::whole(1, 2),
            rescale: None,
        };
        let grant = dev.allocate(model.arena_size).unwrap();
        let id = dev.submit(request(grant.handle, &model, false)).unwrap();
        assert!(matches!(
            dev.wait(id, Duration::from_secs(1)),
            Err(DeviceError::Fault(_))
        ));
        assert_eq!(dev.stats().faults, 1);
    }

    #[test]
    fn test_arena_too_small() {
        let mut dev = opened();
        let mut model = copy_model();
        model.arena_size = 8192;
        let grant = dev.allocate(4096).unwrap();
        assert!(matches!(
            dev.submit(request(grant.handle, &model, false)),
            Err(DeviceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_close_releases_and_is_idempotent() {
        let mut dev = opened();
        dev.allocate(100).unwrap();
        dev.close();
        dev.close();
        assert!(!dev.is_open());
        assert_eq!(dev.memory().num_arenas(), 0);
        dev.open().unwrap();
        assert_eq!(dev.memory().available_bytes(), 64 * 1024);
    }

    #[test]
    fn test_dump_layout() {
        let mut dev = opened();
        let model = copy_model();
        let grant = dev.allocate(model.arena_size).unwrap();
        let dump = dev.dump(grant.handle, &model).unwrap();
        assert_eq!(&dump[..8], DUMP_MAGIC);
        assert_eq!(u32::from_le_bytes(dump[8..12].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(dump[12..20].try_into().unwrap()), 4096);
        let listing = String::from_utf8(dump[20 + 4096..].to_vec()).unwrap();
        assert!(listing.starts_with("Model 'copy'"));
    }

    #[test]
    fn test_capabilities() {
        let caps = SimulatedAccelerator::default().with_alignment(32).capabilities();
        assert_eq!(caps.alignment_bytes, 32);
        assert_eq!(caps.allocation_granularity, DEFAULT_GRANULARITY);
        assert!(caps.modes.contains(&ExecutionMode::SoftwareExact));
    }
}
