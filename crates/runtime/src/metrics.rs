// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer performance counters.
//!
//! A [`ModelProfile`] is created with one zeroed [`PerfRecord`] per
//! instruction-emitting layer when a model is loaded with profiling
//! enabled. Every inference adds its cycle counts to the existing records;
//! nothing is ever replaced.

use crate::device_context::{DeviceContext, ModelHandle};
use crate::RuntimeError;
use executable::ExecutableModel;
use std::collections::BTreeMap;
use std::time::Duration;

/// Accumulated counters of one layer (or of the whole model).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PerfRecord {
    pub name: String,
    pub device_cycles: u64,
    /// Host time attributed to this layer, proportional to its cycle share.
    pub execution_time: Duration,
    pub invocations: u64,
}

impl PerfRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, cycles: u64, time: Duration) {
        self.device_cycles += cycles;
        self.execution_time += time;
        self.invocations += 1;
    }

    pub fn average_cycles(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.device_cycles as f64 / self.invocations as f64
        }
    }

    /// Returns a one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{:<24} {:>10} cycles {:>9.3}ms {:>6} runs ({:.0} cycles/run)",
            self.name,
            self.device_cycles,
            self.execution_time.as_secs_f64() * 1000.0,
            self.invocations,
            self.average_cycles(),
        )
    }
}

/// Counters of one loaded model.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    records: BTreeMap<String, PerfRecord>,
    /// Layer name of each instruction, in stream order.
    layers: Vec<String>,
    total: PerfRecord,
}

impl ModelProfile {
    pub fn new(model: &ExecutableModel) -> Self {
        let layers: Vec<String> = model.instructions.iter().map(|i| i.layer.clone()).collect();
        let records = layers
            .iter()
            .map(|l| (l.clone(), PerfRecord::new(l.clone())))
            .collect();
        Self {
            records,
            layers,
            total: PerfRecord::new(model.name.clone()),
        }
    }

    /// Adds one inference worth of counters.
    pub fn record(&mut self, perf: &device::PerfCounters) {
        let total_cycles = perf.total_cycles.max(1);
        for (layer, cycles) in self.layers.iter().zip(&perf.instruction_cycles) {
            let share = perf.elapsed.mul_f64(*cycles as f64 / total_cycles as f64);
            if let Some(record) = self.records.get_mut(layer) {
                record.add(*cycles, share);
            }
        }
        self.total.add(perf.total_cycles, perf.elapsed);
    }

    /// Per-layer records keyed by layer name.
    pub fn records(&self) -> &BTreeMap<String, PerfRecord> {
        &self.records
    }

    /// Counters of the whole model.
    pub fn total(&self) -> &PerfRecord {
        &self.total
    }

    /// Returns a multi-line table, slowest layers first.
    pub fn summary(&self) -> String {
        let mut rows: Vec<&PerfRecord> = self.records.values().collect();
        rows.sort_by(|a, b| b.device_cycles.cmp(&a.device_cycles));
        let mut out = self.total.summary();
        for r in rows {
            out.push_str("\n  ");
            out.push_str(&r.summary());
        }
        out
    }
}

impl DeviceContext {
    /// Per-layer counters of a model. Empty when the model was loaded
    /// without profiling.
    pub fn collect(&self, handle: ModelHandle) -> Result<BTreeMap<String, PerfRecord>, RuntimeError> {
        Ok(self
            .loaded(handle)?
            .profile
            .as_ref()
            .map(|p| p.records().clone())
            .unwrap_or_default())
    }

    /// Whole-model counters, if the model was loaded with profiling.
    pub fn aggregate(&self, handle: ModelHandle) -> Result<Option<PerfRecord>, RuntimeError> {
        Ok(self.loaded(handle)?.profile.as_ref().map(|p| p.total().clone()))
    }

    pub(crate) fn profile(&self, handle: ModelHandle) -> Result<Option<&ModelProfile>, RuntimeError> {
        Ok(self.loaded(handle)?.profile.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executable::{Instruction, Operation, TensorRef};
    use model_ir::Origin;

    fn model(layers: &[&str]) -> ExecutableModel {
        let copy = Operation::Copy {
            input: TensorRef::whole(0, 1),
            output: TensorRef::whole(0, 1),
            rescale: None,
        };
        ExecutableModel {
            name: "m".into(),
            regions: Vec::new(),
            arena_size: 0,
            parameters: Vec::new(),
            instructions: layers
                .iter()
                .map(|l| Instruction {
                    layer: l.to_string(),
                    origin: Origin::Source,
                    op: copy.clone(),
                })
                .collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            states: Vec::new(),
            scales: Vec::new(),
        }
    }

    fn perf(cycles: &[u64], ms: u64) -> device::PerfCounters {
        device::PerfCounters {
            total_cycles: cycles.iter().sum(),
            instruction_cycles: cycles.to_vec(),
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_zeroed_at_creation() {
        let p = ModelProfile::new(&model(&["a", "b"]));
        assert_eq!(p.records().len(), 2);
        assert!(p.records().values().all(|r| r.invocations == 0 && r.device_cycles == 0));
    }

    #[test]
    fn test_accumulates() {
        let mut p = ModelProfile::new(&model(&["a", "b"]));
        p.record(&perf(&[30, 10], 4));
        p.record(&perf(&[30, 10], 4));
        let a = &p.records()["a"];
        assert_eq!(a.device_cycles, 60);
        assert_eq!(a.invocations, 2);
        assert_eq!(a.execution_time, Duration::from_millis(6));
        assert_eq!(p.total().device_cycles, 80);
        assert_eq!(p.total().invocations, 2);
        assert_eq!(a.average_cycles(), 30.0);
    }

    #[test]
    fn test_summary_orders_by_cycles() {
        let mut p = ModelProfile::new(&model(&["fast", "slow"]));
        p.record(&perf(&[1, 100], 1));
        let s = p.summary();
        let slow = s.find("slow").unwrap();
        let fast = s.find("fast").unwrap();
        assert!(slow < fast);
    }

    #[test]
    fn test_record_serializes() {
        let mut r = PerfRecord::new("fc1");
        r.add(30, Duration::from_micros(5));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["name"], "fc1");
        assert_eq!(json["device_cycles"], 30);
        assert_eq!(json["invocations"], 1);
    }
}
