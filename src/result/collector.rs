//! Hierarchical result collection.
//!
//! The collector is a single-writer structure: workers post immutable
//! [`TestResult`] values over a channel and one aggregator task applies
//! them here. Gates and suites are created lazily on first insertion,
//! statistics roll up at every containing level, and `finalize` stamps
//! wall-clock times and recomputes terminal statuses bottom-up.

use chrono::Utc;
use tracing::debug;

use super::{GateResult, ResultStats, RunnerResult, SuiteResult, TestResult, TestStatus};

/// Gate name used when a work item carries none.
pub const DEFAULT_GATE: &str = "default";

impl RunnerResult {
    /// Creates an empty run result.
    ///
    /// The run starts pessimistically failed; `finalize` recomputes the
    /// status once all results are in.
    pub fn new(run_id: impl Into<String>, is_parallel: bool) -> Self {
        Self {
            run_id: run_id.into(),
            is_parallel,
            gates: std::collections::HashMap::new(),
            status: TestStatus::Fail,
            duration: std::time::Duration::ZERO,
            wall_clock_time: std::time::Duration::ZERO,
            stats: ResultStats::new(),
        }
    }

    /// Pre-registers a gate so its description is available before any of
    /// its tests complete. Idempotent; insertion also creates gates lazily.
    pub fn register_gate(&mut self, id: &str, description: &str) {
        self.gates
            .entry(id.to_string())
            .or_insert_with(|| GateResult::new(id, description));
    }

    /// Pre-registers a suite within a gate. Idempotent.
    pub fn register_suite(&mut self, gate_id: &str, suite_id: &str, description: &str) {
        let gate = self
            .gates
            .entry(gate_id.to_string())
            .or_insert_with(|| GateResult::new(gate_id, ""));
        gate.suites
            .entry(suite_id.to_string())
            .or_insert_with(|| SuiteResult::new(suite_id, description));
    }

    /// Folds one test result into the hierarchy.
    ///
    /// The gate (and suite, when the item names one) is created lazily.
    /// Statistics and cumulative durations are updated at the suite,
    /// gate, and run levels.
    pub fn add_test_result(&mut self, test: TestResult) {
        let gate_name = if test.metadata.gate.is_empty() {
            DEFAULT_GATE.to_string()
        } else {
            test.metadata.gate.clone()
        };
        let suite_name = test.metadata.suite.clone();
        let key = test.key();
        let status = test.status;
        let duration = test.duration;

        debug!(test = %key, gate = %gate_name, status = %status, "recording result");

        let gate = self
            .gates
            .entry(gate_name.clone())
            .or_insert_with(|| GateResult::new(&gate_name, ""));

        match suite_name {
            Some(suite_name) => {
                let suite = gate
                    .suites
                    .entry(suite_name.clone())
                    .or_insert_with(|| SuiteResult::new(&suite_name, ""));
                suite.stats.record(status);
                suite.duration += duration;
                suite.tests.insert(key, test);
            }
            None => {
                gate.tests.insert(key, test);
            }
        }

        gate.stats.record(status);
        gate.duration += duration;
        self.stats.record(status);
        self.duration += duration;
    }

    /// Stamps end times and wall-clock durations at every level and
    /// recomputes terminal statuses bottom-up.
    ///
    /// After this the tree is complete; callers must not insert further
    /// results.
    pub fn finalize(&mut self) {
        let now = Utc::now();

        for gate in self.gates.values_mut() {
            for suite in gate.suites.values_mut() {
                suite.wall_clock_time = suite.stats.close(now);
                suite.status = aggregate_status(suite.tests.values().map(|t| t.status));
            }

            gate.wall_clock_time = gate.stats.close(now);
            gate.status = aggregate_status(
                gate.tests
                    .values()
                    .map(|t| t.status)
                    .chain(gate.suites.values().map(|s| s.status)),
            );
        }

        self.wall_clock_time = self.stats.close(now);
        self.status = aggregate_status(self.gates.values().map(|g| g.status));
    }
}

/// Folds child statuses with precedence Fail > Skip > Pass.
///
/// An empty container stays failed; the pessimistic default only flips
/// once real children exist.
fn aggregate_status(statuses: impl Iterator<Item = TestStatus>) -> TestStatus {
    let mut total = 0usize;
    let mut skipped = 0usize;

    for status in statuses {
        total += 1;
        match status {
            TestStatus::Fail => return TestStatus::Fail,
            TestStatus::Skip => skipped += 1,
            TestStatus::Pass => {}
        }
    }

    if total == 0 {
        TestStatus::Fail
    } else if skipped == total {
        TestStatus::Skip
    } else {
        TestStatus::Pass
    }
}
