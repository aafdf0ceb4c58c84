//! Result data model: statuses, the run → gate → suite → test tree, and
//! rolling statistics.
//!
//! All result types are plain serde values. Workers produce immutable
//! [`TestResult`]s; the collector in [`collector`] folds them into the
//! hierarchy and computes terminal statuses. External report writers
//! consume the finished [`RunnerResult`] tree.

pub mod collector;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::ValidatorMetadata;

/// The outcome status of a test, suite, gate, or run.
///
/// Container statuses aggregate child statuses with precedence
/// Fail > Skip > Pass: any failing child fails the container, a container
/// whose children all skipped is skipped, and anything else passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test passed.
    Pass,
    /// Test failed, or the container holds at least one failure.
    Fail,
    /// Test was skipped.
    Skip,
}

impl TestStatus {
    /// Returns `true` if this status does not fail a run.
    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass | TestStatus::Skip)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "pass"),
            TestStatus::Fail => write!(f, "fail"),
            TestStatus::Skip => write!(f, "skip"),
        }
    }
}

/// The outcome of one executed work item.
///
/// A result may nest subtest results to arbitrary depth; subtest names
/// are path-joined with `/` by the external stream. A `Fail` status
/// implies either `error` is set or `timed_out` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// The work item this result belongs to.
    pub metadata: ValidatorMetadata,

    /// Terminal status of the item.
    pub status: TestStatus,

    /// Observed duration of the item.
    pub duration: Duration,

    /// Error detail for failed items.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    /// Raw captured output of the test process.
    ///
    /// Always populated; renderers decide whether to display it.
    pub stdout: String,

    /// Whether the item exceeded its timeout.
    pub timed_out: bool,

    /// Nested subtest results, keyed by the stream's full subtest name.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub subtests: HashMap<String, TestResult>,
}

impl TestResult {
    /// Creates a pessimistic (failed, zero-duration) result for the item.
    pub fn new(metadata: ValidatorMetadata) -> Self {
        Self {
            metadata,
            status: TestStatus::Fail,
            duration: Duration::ZERO,
            error: None,
            stdout: String::new(),
            timed_out: false,
            subtests: HashMap::new(),
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the error detail.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the captured output.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// The key this result is stored under within its suite or gate.
    pub fn key(&self) -> String {
        self.metadata.key()
    }
}

/// Rolling statistics for one container level.
///
/// Invariant: `total == passed + failed + skipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultStats {
    /// Number of tests recorded.
    pub total: usize,
    /// Number of passing tests.
    pub passed: usize,
    /// Number of failing tests.
    pub failed: usize,
    /// Number of skipped tests.
    pub skipped: usize,
    /// When this container was created.
    pub start_time: DateTime<Utc>,
    /// When this container was finalized.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl ResultStats {
    fn new() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    fn record(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Skip => self.skipped += 1,
        }
    }

    fn close(&mut self, now: DateTime<Utc>) -> Duration {
        self.end_time = Some(now);
        (now - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Aggregated results for one suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    /// Suite identifier.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Test results keyed by `"{package}::{func}"` (or `"{package}"`).
    pub tests: HashMap<String, TestResult>,
    /// Terminal status, computed at finalize time.
    pub status: TestStatus,
    /// Cumulative sum of child test durations.
    pub duration: Duration,
    /// Real elapsed time from creation to finalize.
    pub wall_clock_time: Duration,
    /// Rolling statistics.
    pub stats: ResultStats,
}

impl SuiteResult {
    fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tests: HashMap::new(),
            status: TestStatus::Fail,
            duration: Duration::ZERO,
            wall_clock_time: Duration::ZERO,
            stats: ResultStats::new(),
        }
    }
}

/// Aggregated results for one gate.
///
/// Tests may attach directly to the gate or via a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate identifier.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Direct test results, keyed like suite tests.
    pub tests: HashMap<String, TestResult>,
    /// Suite results keyed by suite ID.
    pub suites: HashMap<String, SuiteResult>,
    /// Terminal status, computed at finalize time.
    pub status: TestStatus,
    /// Cumulative sum of child test durations.
    pub duration: Duration,
    /// Real elapsed time from creation to finalize.
    pub wall_clock_time: Duration,
    /// Rolling statistics over all tests in the gate.
    pub stats: ResultStats,
}

impl GateResult {
    fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tests: HashMap::new(),
            suites: HashMap::new(),
            status: TestStatus::Fail,
            duration: Duration::ZERO,
            wall_clock_time: Duration::ZERO,
            stats: ResultStats::new(),
        }
    }
}

/// Top-level aggregated results of one run.
///
/// Created pessimistically failed; [`collector`] operations insert test
/// results and `finalize` computes terminal statuses bottom-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerResult {
    /// Unique identifier of this run.
    pub run_id: String,
    /// Whether the run used the parallel worker pool.
    pub is_parallel: bool,
    /// Gate results keyed by gate ID.
    pub gates: HashMap<String, GateResult>,
    /// Terminal status, computed at finalize time.
    pub status: TestStatus,
    /// Cumulative sum of all test durations.
    pub duration: Duration,
    /// Real elapsed time from creation to finalize.
    pub wall_clock_time: Duration,
    /// Rolling statistics over every test in the run.
    pub stats: ResultStats,
}

impl RunnerResult {
    /// Returns an appropriate process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            TestStatus::Fail => 1,
            TestStatus::Pass | TestStatus::Skip => 0,
        }
    }

    /// Iterates over every top-level test result in the run, with its key.
    pub fn all_tests(&self) -> impl Iterator<Item = (&String, &TestResult)> {
        self.gates.values().flat_map(|gate| {
            gate.tests
                .iter()
                .chain(gate.suites.values().flat_map(|suite| suite.tests.iter()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(TestStatus::Pass.is_success());
        assert!(TestStatus::Skip.is_success());
        assert!(!TestStatus::Fail.is_success());
    }

    #[test]
    fn test_result_key_modes() {
        let single = TestResult::new(ValidatorMetadata {
            package: "./pkg".into(),
            func_name: "TestX".into(),
            ..Default::default()
        });
        assert_eq!(single.key(), "./pkg::TestX");

        let package = TestResult::new(ValidatorMetadata {
            package: "./pkg".into(),
            run_all: true,
            ..Default::default()
        });
        assert_eq!(package.key(), "./pkg");
    }

    #[test]
    fn test_stats_invariant_holds() {
        let mut stats = ResultStats::new();
        stats.record(TestStatus::Pass);
        stats.record(TestStatus::Fail);
        stats.record(TestStatus::Fail);
        stats.record(TestStatus::Skip);

        assert_eq!(stats.total, 4);
        assert_eq!(stats.total, stats.passed + stats.failed + stats.skipped);
    }
}
