//! Flake-shake: repeated execution for stability classification.
//!
//! The driver re-runs a gate N times, flattens every iteration's results
//! by test key, and computes per-test pass-rate statistics. Tests that
//! pass every observed run are `STABLE`; anything less is `UNSTABLE`.
//!
//! A failed iteration is logged and skipped; statistics reflect the
//! reduced denominator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::plan::{self, ConfigError};
use crate::result::{RunnerResult, TestResult, TestStatus};
use crate::runner::{Runner, TestHarness};

/// At most this many failure stdouts are kept per test.
pub const MAX_FAILURE_LOGS: usize = 5;

/// Stability verdict for one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    /// The test passed every observed run.
    Stable,
    /// The test failed or skipped at least once.
    Unstable,
}

/// Cross-run statistics for one test.
#[derive(Debug, Clone, Serialize)]
pub struct FlakeShakeTestStats {
    /// Test function name; empty for package-level items.
    pub test_name: String,
    /// Package the test belongs to.
    pub package: String,
    /// Number of iterations this test was observed in.
    pub total_runs: usize,
    /// Number of passing runs.
    pub passes: usize,
    /// Number of failing runs.
    pub failures: usize,
    /// Number of skipped runs.
    pub skipped: usize,
    /// `passes / total_runs × 100`.
    pub pass_rate: f64,
    /// Mean duration across observed runs.
    pub avg_duration: Duration,
    /// Shortest observed duration.
    pub min_duration: Duration,
    /// Longest observed duration.
    pub max_duration: Duration,
    /// Captured stdout of up to [`MAX_FAILURE_LOGS`] failing runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_logs: Vec<String>,
    /// When the most recent failure was observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    /// Stability verdict.
    pub recommendation: Recommendation,
}

/// The full flake-shake report handed to report writers.
#[derive(Debug, Clone, Serialize)]
pub struct FlakeShakeReport {
    /// When the flake-shake started.
    pub date: DateTime<Utc>,
    /// Gate that was exercised.
    pub gate: String,
    /// Iterations that completed and contributed results.
    pub total_runs: usize,
    /// Iterations that were requested.
    pub iterations: usize,
    /// Per-test statistics, in first-seen order.
    pub tests: Vec<FlakeShakeTestStats>,
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
    /// Unique identifier of this flake-shake.
    pub run_id: String,
}

impl FlakeShakeReport {
    /// Returns `true` if every test is stable.
    pub fn all_stable(&self) -> bool {
        self.tests
            .iter()
            .all(|t| t.recommendation == Recommendation::Stable)
    }
}

/// Runs the gate `iterations` times and computes stability statistics.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the gate cannot be expanded into a
/// plan; nothing is executed in that case. Failures of individual
/// iterations are logged and skipped instead.
pub async fn run_flake_shake<H: TestHarness>(
    runner: &Runner<H>,
    gate_id: &str,
    iterations: usize,
) -> Result<FlakeShakeReport, ConfigError> {
    // Planning problems are fatal before the first iteration.
    plan::plan_gate(runner.config(), gate_id)?;

    let date = Utc::now();
    let mut runs: Vec<(RunnerResult, DateTime<Utc>)> = Vec::with_capacity(iterations);

    for iteration in 1..=iterations {
        info!(gate = %gate_id, iteration, iterations, "flake-shake iteration");
        match runner.run_gate(gate_id).await {
            Ok(run) => runs.push((run, Utc::now())),
            Err(err) => {
                warn!(gate = %gate_id, iteration, error = %err, "iteration failed; skipping");
            }
        }
    }

    Ok(assemble_report(gate_id, iterations, date, &runs))
}

fn assemble_report(
    gate_id: &str,
    iterations: usize,
    date: DateTime<Utc>,
    runs: &[(RunnerResult, DateTime<Utc>)],
) -> FlakeShakeReport {
    let mut accumulators: IndexMap<String, Accumulator> = IndexMap::new();

    for (run, completed_at) in runs {
        for (key, test) in run.all_tests() {
            accumulators
                .entry(key.clone())
                .or_insert_with(|| Accumulator::new(test))
                .record(test, *completed_at);
        }
    }

    FlakeShakeReport {
        date,
        gate: gate_id.to_string(),
        total_runs: runs.len(),
        iterations,
        tests: accumulators.into_values().map(Accumulator::finish).collect(),
        generated_at: Utc::now(),
        run_id: Uuid::new_v4().to_string(),
    }
}

struct Accumulator {
    test_name: String,
    package: String,
    passes: usize,
    failures: usize,
    skipped: usize,
    durations: Vec<Duration>,
    failure_logs: Vec<String>,
    last_failure: Option<DateTime<Utc>>,
}

impl Accumulator {
    fn new(test: &TestResult) -> Self {
        Self {
            test_name: test.metadata.func_name.clone(),
            package: test.metadata.package.clone(),
            passes: 0,
            failures: 0,
            skipped: 0,
            durations: Vec::new(),
            failure_logs: Vec::new(),
            last_failure: None,
        }
    }

    fn record(&mut self, test: &TestResult, completed_at: DateTime<Utc>) {
        self.durations.push(test.duration);
        match test.status {
            TestStatus::Pass => self.passes += 1,
            TestStatus::Fail => {
                self.failures += 1;
                self.last_failure = Some(completed_at);
                if self.failure_logs.len() < MAX_FAILURE_LOGS {
                    self.failure_logs.push(test.stdout.clone());
                }
            }
            TestStatus::Skip => self.skipped += 1,
        }
    }

    fn finish(self) -> FlakeShakeTestStats {
        let total_runs = self.durations.len();
        let pass_rate = if total_runs == 0 {
            0.0
        } else {
            self.passes as f64 / total_runs as f64 * 100.0
        };
        let sum: Duration = self.durations.iter().sum();
        let avg_duration = if total_runs == 0 {
            Duration::ZERO
        } else {
            sum / total_runs as u32
        };

        FlakeShakeTestStats {
            test_name: self.test_name,
            package: self.package,
            total_runs,
            passes: self.passes,
            failures: self.failures,
            skipped: self.skipped,
            pass_rate,
            avg_duration,
            min_duration: self.durations.iter().min().copied().unwrap_or(Duration::ZERO),
            max_duration: self.durations.iter().max().copied().unwrap_or(Duration::ZERO),
            failure_logs: self.failure_logs,
            last_failure: self.last_failure,
            recommendation: if pass_rate == 100.0 {
                Recommendation::Stable
            } else {
                Recommendation::Unstable
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ValidatorMetadata;

    fn run_with(status: TestStatus, duration_ms: u64, stdout: &str) -> RunnerResult {
        let mut run = RunnerResult::new("iter", true);
        let result = TestResult::new(ValidatorMetadata {
            gate: "g".to_string(),
            package: "./pkg".to_string(),
            func_name: "TestWobbly".to_string(),
            ..Default::default()
        })
        .with_status(status)
        .with_duration(Duration::from_millis(duration_ms))
        .with_stdout(stdout);
        let result = match status {
            TestStatus::Fail => result.with_error("boom"),
            _ => result,
        };
        run.add_test_result(result);
        run.finalize();
        run
    }

    #[test]
    fn test_nine_passes_one_failure_is_unstable() {
        let mut runs: Vec<(RunnerResult, DateTime<Utc>)> = (0..9)
            .map(|_| (run_with(TestStatus::Pass, 100, "ok"), Utc::now()))
            .collect();
        runs.push((run_with(TestStatus::Fail, 300, "fail log"), Utc::now()));

        let report = assemble_report("g", 10, Utc::now(), &runs);
        assert_eq!(report.total_runs, 10);
        assert_eq!(report.tests.len(), 1);

        let stats = &report.tests[0];
        assert_eq!(stats.total_runs, 10);
        assert_eq!(stats.passes, 9);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.pass_rate, 90.0);
        assert_eq!(stats.recommendation, Recommendation::Unstable);
        assert_eq!(stats.failure_logs.len(), 1);
        assert_eq!(stats.failure_logs[0], "fail log");
        assert!(stats.last_failure.is_some());
    }

    #[test]
    fn test_all_passes_is_stable() {
        let runs: Vec<(RunnerResult, DateTime<Utc>)> = (0..5)
            .map(|_| (run_with(TestStatus::Pass, 100, "ok"), Utc::now()))
            .collect();

        let report = assemble_report("g", 5, Utc::now(), &runs);
        let stats = &report.tests[0];
        assert_eq!(stats.pass_rate, 100.0);
        assert_eq!(stats.recommendation, Recommendation::Stable);
        assert!(stats.failure_logs.is_empty());
        assert!(stats.last_failure.is_none());
        assert!(report.all_stable());
    }

    #[test]
    fn test_duration_statistics() {
        let runs: Vec<(RunnerResult, DateTime<Utc>)> = [100u64, 200, 300]
            .iter()
            .map(|ms| (run_with(TestStatus::Pass, *ms, "ok"), Utc::now()))
            .collect();

        let report = assemble_report("g", 3, Utc::now(), &runs);
        let stats = &report.tests[0];
        assert_eq!(stats.min_duration, Duration::from_millis(100));
        assert_eq!(stats.max_duration, Duration::from_millis(300));
        assert_eq!(stats.avg_duration, Duration::from_millis(200));
    }

    #[test]
    fn test_failure_logs_capped() {
        let runs: Vec<(RunnerResult, DateTime<Utc>)> = (0..8)
            .map(|i| {
                (
                    run_with(TestStatus::Fail, 100, &format!("log {i}")),
                    Utc::now(),
                )
            })
            .collect();

        let report = assemble_report("g", 8, Utc::now(), &runs);
        let stats = &report.tests[0];
        assert_eq!(stats.failures, 8);
        assert_eq!(stats.failure_logs.len(), MAX_FAILURE_LOGS);
    }

    #[test]
    fn test_skipped_iterations_reduce_denominator() {
        // Only 3 of 5 requested iterations completed.
        let runs: Vec<(RunnerResult, DateTime<Utc>)> = (0..3)
            .map(|_| (run_with(TestStatus::Pass, 100, "ok"), Utc::now()))
            .collect();

        let report = assemble_report("g", 5, Utc::now(), &runs);
        assert_eq!(report.iterations, 5);
        assert_eq!(report.total_runs, 3);
        assert_eq!(report.tests[0].total_runs, 3);
        assert_eq!(report.tests[0].pass_rate, 100.0);
    }

    #[test]
    fn test_serialized_recommendation_casing() {
        let json = serde_json::to_string(&Recommendation::Stable).unwrap();
        assert_eq!(json, r#""STABLE""#);
        let json = serde_json::to_string(&Recommendation::Unstable).unwrap();
        assert_eq!(json, r#""UNSTABLE""#);
    }
}
