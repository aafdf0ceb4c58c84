//! Configuration schema definitions for gauntlet.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. The schema describes the gate/suite/test tree
//! the runner executes plus the `[runner]` options table.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunnerConfig           - [runner] options (concurrency, timeouts, logging)
//! └── Gates                  - ordered [[gates]] entries
//!     └── GateConfig
//!         ├── tests          - tests attached directly to the gate
//!         └── suites         - named suites (declaration order preserved)
//!             └── SuiteConfig
//!                 └── tests
//! ```

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root configuration structure for gauntlet.
///
/// Represents a complete configuration loaded from a TOML file: the runner
/// options and the gate tree to execute.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Runner options controlling execution behavior.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Gates to execute, in declaration order.
    #[serde(default)]
    pub gates: Vec<GateConfig>,
}

impl Config {
    /// Looks up a gate by ID.
    pub fn gate(&self, id: &str) -> Option<&GateConfig> {
        self.gates.iter().find(|g| g.id == id)
    }
}

/// Runner execution options.
///
/// These settings control how work items are executed: parallelism,
/// timeouts, progress reporting, and log handling. Every field has a
/// default so an empty `[runner]` table (or none at all) is valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Requested worker-pool size.
    ///
    /// Zero or negative values select automatic sizing from the detected
    /// CPU count. Positive values are capped by the number of work items
    /// and the engine's hard concurrency ceiling.
    #[serde(default)]
    pub concurrency: i32,

    /// Run work items one at a time on the caller's task, with no pool.
    #[serde(default)]
    pub serial: bool,

    /// Emit periodic summaries of the longest-running tests.
    #[serde(default)]
    pub show_progress: bool,

    /// Seconds between progress summaries when `show_progress` is set.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Include captured test output in the end-of-run summary.
    ///
    /// Output is always captured into each result; this only gates
    /// whether the summary printer displays it.
    #[serde(default)]
    pub output_test_logs: bool,

    /// Forward `output` events from the test stream as live log records.
    #[serde(default)]
    pub output_realtime_logs: bool,

    /// Value exported as `TEST_LOG_LEVEL` to each spawned test process.
    #[serde(default)]
    pub test_log_level: Option<String>,

    /// Flake-shake iteration count.
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Fallback timeout, in seconds, for tests that configure none.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Extra arguments appended to every generated test command,
    /// split with shell quoting rules.
    #[serde(default)]
    pub extra_args: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            serial: false,
            show_progress: false,
            progress_interval_secs: default_progress_interval(),
            output_test_logs: false,
            output_realtime_logs: false,
            test_log_level: None,
            iterations: default_iterations(),
            default_timeout_secs: None,
            extra_args: None,
        }
    }
}

impl RunnerConfig {
    /// Progress summary interval as a [`Duration`].
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Fallback timeout as a [`Duration`], if configured.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Splits `extra_args` into argv form using shell quoting rules.
    ///
    /// Returns an empty vector when no extra arguments are configured.
    pub fn extra_args(&self) -> Result<Vec<String>, shell_words::ParseError> {
        match &self.extra_args {
            Some(raw) => shell_words::split(raw),
            None => Ok(Vec::new()),
        }
    }
}

fn default_progress_interval() -> u64 {
    30
}

fn default_iterations() -> usize {
    3
}

/// A top-level gate: a named grouping of tests with a pass/fail verdict.
///
/// Tests may attach directly to the gate or via named suites. Suites keep
/// their declaration order, which the planner preserves.
///
/// # Example
///
/// ```toml
/// [[gates]]
/// id = "acceptance"
/// description = "Base acceptance checks"
///
///   [[gates.tests]]
///   package = "./validators/base"
///   run_all = true
///
///   [gates.suites.interop]
///   description = "Cross-client interop"
///   tests = [{ package = "./validators/interop", name = "TestHandshake" }]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Unique gate identifier.
    pub id: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Tests attached directly to the gate.
    #[serde(default)]
    pub tests: Vec<TestConfig>,

    /// Suites within the gate, keyed by suite ID.
    #[serde(default)]
    pub suites: IndexMap<String, SuiteConfig>,
}

/// A suite: a mid-level named grouping of tests within a gate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SuiteConfig {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Tests in this suite.
    #[serde(default)]
    pub tests: Vec<TestConfig>,
}

/// One configured test: either a single function or a whole package.
///
/// Exactly one mode must be selected: `name` for a single-function item,
/// or `run_all = true` for a package-level item. The planner rejects
/// configurations that set both or neither.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestConfig {
    /// Package path handed to the test command.
    pub package: String,

    /// Test function to run. Mutually exclusive with `run_all`.
    #[serde(default)]
    pub name: Option<String>,

    /// Run every test in the package. Mutually exclusive with `name`.
    #[serde(default)]
    pub run_all: bool,

    /// Per-test timeout in seconds. Falls back to
    /// `runner.default_timeout_secs` when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TestConfig {
    /// Per-test timeout as a [`Duration`], if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_defaults() {
        let config: RunnerConfig = toml::from_str("").unwrap();
        assert_eq!(config.concurrency, 0);
        assert!(!config.serial);
        assert!(!config.show_progress);
        assert_eq!(config.progress_interval_secs, 30);
        assert_eq!(config.iterations, 3);
        assert!(config.test_log_level.is_none());
        assert!(config.extra_args().unwrap().is_empty());
    }

    #[test]
    fn test_suites_preserve_declaration_order() {
        let gate: GateConfig = toml::from_str(
            r#"
            id = "g"

            [suites.zeta]
            tests = []

            [suites.alpha]
            tests = []

            [suites.mid]
            tests = []
            "#,
        )
        .unwrap();

        let order: Vec<&str> = gate.suites.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_extra_args_shell_splitting() {
        let config = RunnerConfig {
            extra_args: Some(r#"-race -ldflags "-X main.version=dev""#.to_string()),
            ..Default::default()
        };
        let args = config.extra_args().unwrap();
        assert_eq!(args, vec!["-race", "-ldflags", "-X main.version=dev"]);
    }

    #[test]
    fn test_test_config_timeout_conversion() {
        let test: TestConfig = toml::from_str(
            r#"
            package = "./pkg/p2p"
            name = "TestPeerDiscovery"
            timeout_secs = 90
            "#,
        )
        .unwrap();
        assert_eq!(test.timeout(), Some(Duration::from_secs(90)));
    }
}
