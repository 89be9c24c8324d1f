// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A scriptable accelerator for exercising runtime error paths.
//!
//! [`FakeAccelerator`] runs requests on a [`SimulatedAccelerator`] but can
//! be told to refuse `open`, over-grant memory, hang on waits or fault the
//! next request. Every call is recorded. The knobs and the call log live
//! behind a [`FakeControl`] handle that stays usable after the accelerator
//! has been moved into a runtime.

use crate::api::{
    Accelerator, Allocator, Capabilities, ExecutionMode, PerfCounters, RequestId, SubmitRequest,
    Submitter, WaitStatus, Waiter,
};
use crate::simulator::SimulatedAccelerator;
use crate::{ArenaHandle, DeviceError, Grant, MemoryBudget};
use executable::ExecutableModel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded accelerator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    Allocate { requested: u64, granted: Option<u64> },
    Free(ArenaHandle),
    Write { offset: u64, len: usize },
    Read { offset: u64, len: usize },
    Submit { mode: ExecutionMode, profiling: bool },
    Wait { with_perf: bool },
    Dump,
}

#[derive(Debug, Clone, Default)]
struct Knobs {
    unavailable: bool,
    extra_grant: u64,
    hang: bool,
    fault_next: bool,
}

#[derive(Debug, Default)]
struct Shared {
    knobs: Knobs,
    calls: Vec<Call>,
}

/// Shared handle to a [`FakeAccelerator`]'s knobs and call log.
#[derive(Debug, Clone, Default)]
pub struct FakeControl {
    shared: Arc<Mutex<Shared>>,
}

impl FakeControl {
    fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut guard = match self.shared.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn knobs(&self) -> Knobs {
        self.with(|s| s.knobs.clone())
    }

    fn record(&self, call: Call) {
        self.with(|s| s.calls.push(call));
    }

    /// Makes `open` fail with [`DeviceError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.with(|s| s.knobs.unavailable = unavailable);
    }

    /// Grants `bytes` more than each allocation asks for.
    pub fn set_extra_grant(&self, bytes: u64) {
        self.with(|s| s.knobs.extra_grant = bytes);
    }

    /// Makes every wait time out.
    pub fn set_hang(&self, hang: bool) {
        self.with(|s| s.knobs.hang = hang);
    }

    /// Makes the next submission complete with a device fault.
    pub fn fault_next_submission(&self) {
        self.with(|s| s.knobs.fault_next = true);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }
}

/// Fault-injecting accelerator backed by the simulator.
#[derive(Debug)]
pub struct FakeAccelerator {
    inner: SimulatedAccelerator,
    control: FakeControl,
}

impl FakeAccelerator {
    pub fn new(budget: MemoryBudget, granularity: u64) -> Self {
        Self {
            inner: SimulatedAccelerator::new(budget, granularity),
            control: FakeControl::default(),
        }
    }

    /// A handle for scripting this accelerator after it has been moved.
    pub fn control(&self) -> FakeControl {
        self.control.clone()
    }

    pub fn simulator(&self) -> &SimulatedAccelerator {
        &self.inner
    }

    fn hanging(&self) -> bool {
        self.control.knobs().hang
    }
}

impl Default for FakeAccelerator {
    fn default() -> Self {
        Self::new(MemoryBudget::from_mb(64), crate::simulator::DEFAULT_GRANULARITY)
    }
}

impl Allocator for FakeAccelerator {
    fn allocate(&mut self, size: u64) -> Result<Grant, DeviceError> {
        let extra = self.control.knobs().extra_grant;
        let result = if self.inner.is_open() {
            self.inner.memory_mut().allocate(size, extra)
        } else {
            Err(DeviceError::NotOpen)
        };
        self.control.record(Call::Allocate {
            requested: size,
            granted: result.as_ref().ok().map(|g| g.granted),
        });
        result
    }

    fn free(&mut self, arena: ArenaHandle) -> Result<(), DeviceError> {
        self.control.record(Call::Free(arena));
        self.inner.free(arena)
    }

    fn write(&mut self, arena: ArenaHandle, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        self.control.record(Call::Write {
            offset,
            len: bytes.len(),
        });
        self.inner.write(arena, offset, bytes)
    }

    fn read(&self, arena: ArenaHandle, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError> {
        self.control.record(Call::Read { offset, len });
        self.inner.read(arena, offset, len)
    }
}

impl Submitter for FakeAccelerator {
    fn submit(&mut self, request: SubmitRequest<'_>) -> Result<RequestId, DeviceError> {
        self.control.record(Call::Submit {
            mode: request.mode,
            profiling: request.profiling,
        });
        let inject = self.control.with(|s| std::mem::take(&mut s.knobs.fault_next));
        if inject {
            return self.inner.submit_faulted("injected fault");
        }
        self.inner.submit(request)
    }
}

impl Waiter for FakeAccelerator {
    fn wait(&mut self, request: RequestId, timeout: Duration) -> Result<WaitStatus, DeviceError> {
        self.control.record(Call::Wait { with_perf: false });
        if self.hanging() {
            return Ok(WaitStatus::TimedOut);
        }
        self.inner.wait(request, timeout)
    }

    fn wait_with_perf(
        &mut self,
        request: RequestId,
        timeout: Duration,
    ) -> Result<(WaitStatus, PerfCounters), DeviceError> {
        self.control.record(Call::Wait { with_perf: true });
        if self.hanging() {
            return Ok((WaitStatus::TimedOut, PerfCounters::default()));
        }
        self.inner.wait_with_perf(request, timeout)
    }
}

impl Accelerator for FakeAccelerator {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.control.record(Call::Open);
        if self.control.knobs().unavailable {
            return Err(DeviceError::Unavailable("fake accelerator set unavailable".into()));
        }
        self.inner.open()
    }

    fn close(&mut self) {
        self.control.record(Call::Close);
        self.inner.close();
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            name: "fake".to_string(),
            ..self.inner.capabilities()
        }
    }

    fn dump(&mut self, arena: ArenaHandle, model: &ExecutableModel) -> Result<Vec<u8>, DeviceError> {
        self.control.record(Call::Dump);
        self.inner.dump(arena, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> (FakeAccelerator, FakeControl) {
        let mut dev = FakeAccelerator::new(MemoryBudget::from_kb(64), 4096);
        let control = dev.control();
        dev.open().unwrap();
        (dev, control)
    }

    fn empty_model() -> ExecutableModel {
        ExecutableModel {
            name: "empty".into(),
            regions: Vec::new(),
            arena_size: 4096,
            parameters: Vec::new(),
            instructions: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            states: Vec::new(),
            scales: Vec::new(),
        }
    }

    fn submit(dev: &mut FakeAccelerator, arena: ArenaHandle, model: &ExecutableModel) -> RequestId {
        dev.submit(SubmitRequest {
            arena,
            model,
            mode: ExecutionMode::SoftwareExact,
            profiling: false,
        })
        .unwrap()
    }

    #[test]
    fn test_unavailable() {
        let mut dev = FakeAccelerator::default();
        dev.control().set_unavailable(true);
        assert!(matches!(dev.open(), Err(DeviceError::Unavailable(_))));
        assert_eq!(dev.control().calls(), vec![Call::Open]);
    }

    #[test]
    fn test_extra_grant() {
        let (mut dev, control) = opened();
        control.set_extra_grant(128);
        let g = dev.allocate(100).unwrap();
        assert_eq!(g.granted, 4096 + 128);
        assert!(control.calls().contains(&Call::Allocate {
            requested: 100,
            granted: Some(4224)
        }));
    }

    #[test]
    fn test_hang_times_out() {
        let (mut dev, control) = opened();
        let model = empty_model();
        let g = dev.allocate(4096).unwrap();
        let id = submit(&mut dev, g.handle, &model);
        control.set_hang(true);
        assert_eq!(
            dev.wait(id, Duration::from_millis(5)).unwrap(),
            WaitStatus::TimedOut
        );
    }

    #[test]
    fn test_fault_next_only_once() {
        let (mut dev, control) = opened();
        let model = empty_model();
        let g = dev.allocate(4096).unwrap();
        control.fault_next_submission();
        let first = submit(&mut dev, g.handle, &model);
        assert!(matches!(
            dev.wait(first, Duration::from_secs(1)),
            Err(DeviceError::Fault(_))
        ));
        let second = submit(&mut dev, g.handle, &model);
        assert_eq!(
            dev.wait(second, Duration::from_secs(1)).unwrap(),
            WaitStatus::Completed
        );
        assert_eq!(control.count(|c| matches!(c, Call::Submit { .. })), 2);
    }

    #[test]
    fn test_call_log_order() {
        let (mut dev, control) = opened();
        let g = dev.allocate(10).unwrap();
        dev.write(g.handle, 0, &[1, 2]).unwrap();
        dev.free(g.handle).unwrap();
        dev.close();
        assert_eq!(
            control.calls(),
            vec![
                Call::Open,
                Call::Allocate {
                    requested: 10,
                    granted: Some(4096)
                },
                Call::Write { offset: 0, len: 2 },
                Call::Free(g.handle),
                Call::Close,
            ]
        );
        assert_eq!(dev.capabilities().name, "fake");
    }
}
