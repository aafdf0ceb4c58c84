//! # gauntlet
//!
//! A declarative test-orchestration engine: gates, suites, and tests are
//! described in configuration, expanded into work items, and executed in
//! parallel against an external test command whose streaming JSON event
//! log is parsed into a hierarchical result tree.
//!
//! ## Architecture
//!
//! The crate is organized around four subsystems:
//!
//! ### Planning ([`plan`])
//!
//! Expands the configured gate/suite/test tree ([`config`]) into a flat,
//! ordered list of [`ValidatorMetadata`] work items, rejecting malformed
//! configurations before anything runs.
//!
//! ### Execution ([`runner`])
//!
//! A bounded worker pool sized by [`runner::determine_concurrency`]
//! draws work items from a channel and executes each through the
//! [`runner::invoker`]: one external process per item, with per-item
//! timeouts, cooperative cancellation, and live progress tracking. The
//! [`TestHarness`] trait is the seam for new test commands; any program
//! emitting the documented event stream works.
//!
//! ### Parsing ([`events`])
//!
//! A pure incremental parser turns each captured event stream into a
//! [`TestResult`], including nested subtests and timeout attribution.
//!
//! ### Aggregation ([`result`])
//!
//! A single-writer collector folds per-item results into the
//! run → gate → suite → test tree, maintains rolling statistics, and
//! computes terminal statuses by Fail > Skip > Pass precedence.
//!
//! [`flake`] wraps the engine to re-run a gate N times and classify each
//! test as stable or unstable; [`report`] prints console summaries.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gauntlet::config::load_config;
//! use gauntlet::runner::{GoTestHarness, Runner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("gauntlet.toml"))?;
//!     let runner = Runner::new(config, GoTestHarness::new());
//!
//!     let result = runner.run().await?;
//!     gauntlet::report::print_summary(&result, false);
//!     std::process::exit(result.exit_code());
//! }
//! ```

pub mod config;
pub mod events;
pub mod flake;
pub mod plan;
pub mod report;
pub mod result;
pub mod runner;

// Re-export commonly used types for convenience.

pub use config::{Config, load_config, load_config_str};
pub use flake::{FlakeShakeReport, run_flake_shake};
pub use plan::{ConfigError, ValidatorMetadata, plan, plan_gate};
pub use result::{GateResult, RunnerResult, SuiteResult, TestResult, TestStatus};
pub use runner::{GoTestHarness, Runner, TestHarness, determine_concurrency};
