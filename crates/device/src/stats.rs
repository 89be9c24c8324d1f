// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device usage statistics.

/// Cumulative counters kept by an accelerator backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceStats {
    /// Arena allocation requests, including refused ones.
    pub allocations: u64,
    pub frees: u64,
    /// Requests refused for lack of device memory.
    pub oom_count: u64,
    /// Bytes currently granted.
    pub granted_bytes: u64,
    /// High-water mark of `granted_bytes`.
    pub peak_granted_bytes: u64,
    pub submissions: u64,
    pub completions: u64,
    pub faults: u64,
    /// Total simulated device cycles over all completed requests.
    pub total_cycles: u64,
}

impl DeviceStats {
    pub(crate) fn record_grant(&mut self, bytes: u64) {
        self.allocations += 1;
        self.granted_bytes += bytes;
        self.peak_granted_bytes = self.peak_granted_bytes.max(self.granted_bytes);
    }

    pub(crate) fn record_oom(&mut self) {
        self.allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_free(&mut self, bytes: u64) {
        self.frees += 1;
        self.granted_bytes = self.granted_bytes.saturating_sub(bytes);
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Device: {} allocations ({} refused), {} frees, {:.1} KB granted (peak {:.1} KB), \
             {} submissions, {} completed, {} faults, {} cycles",
            self.allocations,
            self.oom_count,
            self.frees,
            self.granted_bytes as f64 / 1024.0,
            self.peak_granted_bytes as f64 / 1024.0,
            self.submissions,
            self.completions,
            self.faults,
            self.total_cycles,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracking() {
        let mut s = DeviceStats::default();
        s.record_grant(4096);
        s.record_grant(8192);
        s.record_free(4096);
        assert_eq!(s.granted_bytes, 8192);
        assert_eq!(s.peak_granted_bytes, 12288);
        s.record_free(8192);
        assert_eq!(s.granted_bytes, 0);
        assert_eq!(s.peak_granted_bytes, 12288);
    }

    #[test]
    fn test_oom_counts_as_allocation() {
        let mut s = DeviceStats::default();
        s.record_oom();
        assert_eq!(s.allocations, 1);
        assert_eq!(s.oom_count, 1);
        assert_eq!(s.granted_bytes, 0);
    }

    #[test]
    fn test_summary() {
        let mut s = DeviceStats::default();
        s.record_grant(2048);
        s.submissions = 3;
        let text = s.summary();
        assert!(text.contains("1 allocations"));
        assert!(text.contains("2.0 KB granted"));
        assert!(text.contains("3 submissions"));
    }
}
