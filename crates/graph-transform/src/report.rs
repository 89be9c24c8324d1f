// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! What each pass changed, for diagnostics.

/// Outcome of a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PassReport {
    pub pass: String,
    /// Synthetic layers added.
    pub inserted: usize,
    /// Existing layers rewritten in place.
    pub rewritten: usize,
}

impl PassReport {
    pub fn new(pass: &str) -> Self {
        Self {
            pass: pass.to_string(),
            ..Self::default()
        }
    }

    /// Returns `true` if the pass left the graph untouched.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.rewritten == 0
    }
}

/// Reports of a full pipeline run, in pass order.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TransformReport {
    pub passes: Vec<PassReport>,
}

impl TransformReport {
    pub fn total_inserted(&self) -> usize {
        self.passes.iter().map(|p| p.inserted).sum()
    }

    pub fn total_rewritten(&self) -> usize {
        self.passes.iter().map(|p| p.rewritten).sum()
    }

    pub fn get(&self, pass: &str) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.pass == pass)
    }

    /// Returns a human-readable summary of the run.
    pub fn summary(&self) -> String {
        let detail: Vec<String> = self
            .passes
            .iter()
            .filter(|p| !p.is_noop())
            .map(|p| format!("{}(+{}, ~{})", p.pass, p.inserted, p.rewritten))
            .collect();
        format!(
            "Transform: {} passes, {} layers inserted, {} rewritten [{}]",
            self.passes.len(),
            self.total_inserted(),
            self.total_rewritten(),
            detail.join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_summary() {
        let report = TransformReport {
            passes: vec![
                PassReport {
                    pass: "a".into(),
                    inserted: 2,
                    rewritten: 1,
                },
                PassReport::new("b"),
            ],
        };
        assert_eq!(report.total_inserted(), 2);
        assert_eq!(report.total_rewritten(), 1);
        assert!(report.get("b").unwrap().is_noop());
        let s = report.summary();
        assert!(s.contains("2 passes"));
        assert!(s.contains("a(+2, ~1)"));
        assert!(!s.contains("b("));
    }
}
