//! The concurrency engine: dispatching work items to a bounded worker
//! pool, tracking live progress, and enforcing cancellation.
//!
//! # Execution model
//!
//! ```text
//!   Config ──► plan() ──► Vec<ValidatorMetadata>
//!                              │
//!               one producer fills the bounded work channel
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            ▼                 ▼                 ▼
//!        worker 1          worker 2  ...     worker N      (pool size from
//!            │                 │                 │       determine_concurrency)
//!            └──── invoker ────┴── TestResult ───┘
//!                              │
//!                      result channel
//!                              ▼
//!                    single aggregator task ──► RunnerResult
//! ```
//!
//! Workers never touch the result tree: they post immutable results over
//! a channel and a dedicated aggregator folds them in. Serial mode skips
//! the pool entirely and produces an identical observable tree.

pub mod invoker;
pub mod progress;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::plan::{self, ConfigError, ValidatorMetadata};
use crate::result::{RunnerResult, TestResult};

pub use invoker::{CommandSpec, GoTestHarness, TestHarness};
pub use progress::format_running_tests;

/// Hard ceiling on pool size regardless of CPU count or configuration.
pub const MAX_REASONABLE_CONCURRENCY: usize = 32;

/// Live set of in-progress work items with their dispatch times.
///
/// Written by workers on entry/exit, read by the progress reporter.
pub type RunningTests = Arc<RwLock<HashMap<String, Instant>>>;

/// Chooses the worker-pool size for a run.
///
/// A positive configured value is used as-is, capped by the number of
/// work items. Zero or negative values auto-size from the detected CPU
/// count: conservative on low-core hosts, more aggressive as cores grow.
/// The result is clamped to `[1, MAX_REASONABLE_CONCURRENCY]` and then
/// to the number of work items, so zero items means zero workers.
pub fn determine_concurrency(num_work_items: usize, requested: i32) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    determine_concurrency_with(num_work_items, requested, cpus)
}

fn determine_concurrency_with(num_work_items: usize, requested: i32, cpus: usize) -> usize {
    let base = if requested > 0 {
        (requested as usize).min(num_work_items)
    } else {
        auto_concurrency(cpus)
    };

    base.clamp(1, MAX_REASONABLE_CONCURRENCY)
        .min(num_work_items)
}

fn auto_concurrency(cpus: usize) -> usize {
    if cpus <= 2 {
        cpus
    } else if cpus <= 4 {
        cpus * 5 / 4
    } else {
        cpus * 3 / 2
    }
}

/// The test runner: expands the configured gate tree and executes it.
///
/// The runner owns the configuration, the harness that turns work items
/// into commands, the live running-tests map, and the cancellation token
/// threaded through every spawned process.
///
/// # Example
///
/// ```no_run
/// use gauntlet::config::load_config;
/// use gauntlet::runner::{GoTestHarness, Runner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = load_config(std::path::Path::new("gauntlet.toml"))?;
///     let runner = Runner::new(config, GoTestHarness::new());
///
///     let result = runner.run().await?;
///     std::process::exit(result.exit_code());
/// }
/// ```
pub struct Runner<H = GoTestHarness> {
    config: Config,
    harness: H,
    running: RunningTests,
    cancel: CancellationToken,
}

impl<H: TestHarness> Runner<H> {
    /// Creates a runner for the given configuration and harness.
    pub fn new(config: Config, harness: H) -> Self {
        Self {
            config,
            harness,
            running: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token, letting the caller wire the
    /// runner into an existing shutdown path.
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this runner's in-flight work when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The live map of in-progress work items.
    pub fn running_tests(&self) -> RunningTests {
        self.running.clone()
    }

    /// The configuration this runner executes.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Expands the whole configuration and executes it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration cannot be
    /// expanded into a plan; nothing is executed in that case.
    pub async fn run(&self) -> Result<RunnerResult, ConfigError> {
        let items = plan::plan(&self.config)?;
        Ok(self.run_plan(&items).await)
    }

    /// Expands and executes a single gate.
    pub async fn run_gate(&self, gate_id: &str) -> Result<RunnerResult, ConfigError> {
        let items = plan::plan_gate(&self.config, gate_id)?;
        Ok(self.run_plan(&items).await)
    }

    /// Executes an already-expanded plan.
    pub async fn run_plan(&self, items: &[ValidatorMetadata]) -> RunnerResult {
        let run_id = Uuid::new_v4().to_string();
        let is_parallel = !self.config.runner.serial;
        let mut run = RunnerResult::new(&run_id, is_parallel);

        self.register_plan(items, &mut run);

        if items.is_empty() {
            warn!("no work items in plan");
            run.finalize();
            return run;
        }

        info!(
            run_id = %run_id,
            items = items.len(),
            parallel = is_parallel,
            "starting run"
        );

        if is_parallel {
            self.run_parallel(items, &mut run);
        } else {
            self.run_serial(items, &mut run).await;
        }

        run.finalize();
        info!(
            run_id = %run_id,
            status = %run.status,
            total = run.stats.total,
            passed = run.stats.passed,
            failed = run.stats.failed,
            skipped = run.stats.skipped,
            "run complete"
        );
        run
    }

    /// Pre-registers gates and suites so descriptions survive even when
    /// every test in them fails to produce a result, and logs each
    /// container start once, in plan order.
    fn register_plan(&self, items: &[ValidatorMetadata], run: &mut RunnerResult) {
        let mut seen: HashSet<(String, Option<String>)> = HashSet::new();

        for item in items {
            if seen.insert((item.gate.clone(), None)) {
                let description = self
                    .config
                    .gate(&item.gate)
                    .map(|g| g.description.as_str())
                    .unwrap_or("");
                info!(gate = %item.gate, "starting gate");
                run.register_gate(&item.gate, description);
            }
            if let Some(suite) = &item.suite
                && seen.insert((item.gate.clone(), Some(suite.clone())))
            {
                let description = self
                    .config
                    .gate(&item.gate)
                    .and_then(|g| g.suites.get(suite))
                    .map(|s| s.description.as_str())
                    .unwrap_or("");
                info!(gate = %item.gate, suite = %suite, "starting suite");
                run.register_suite(&item.gate, suite, description);
            }
        }
    }

    /// Runs items one at a time on the caller's task, with no pool.
    async fn run_serial(&self, items: &[ValidatorMetadata], run: &mut RunnerResult) {
        for item in items {
            let result = self.execute_item(item).await;
            run.add_test_result(result);
        }
    }

    /// Runs items on a bounded worker pool.
    ///
    /// One producer fills the work channel and closes it; N workers
    /// consume until closed; one aggregator consumes the result channel
    /// until every worker has dropped its sender.
    fn run_parallel(&self, items: &[ValidatorMetadata], run: &mut RunnerResult) {
        let concurrency = determine_concurrency(items.len(), self.config.runner.concurrency);
        debug!(workers = concurrency, items = items.len(), "sizing worker pool");

        let (work_tx, work_rx) = mpsc::channel::<ValidatorMetadata>(items.len());
        for item in items {
            // Capacity equals the item count, so this never blocks.
            work_tx
                .try_send(item.clone())
                .expect("work channel sized to the plan");
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<TestResult>(concurrency.max(1));
        let done = CancellationToken::new();

        tokio_scoped::scope(|scope| {
            if self.config.runner.show_progress {
                scope.spawn(progress::report_progress(
                    self.running.clone(),
                    self.config.runner.progress_interval(),
                    done.clone(),
                ));
            }

            for _ in 0..concurrency {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(async move {
                    loop {
                        let item = { work_rx.lock().await.recv().await };
                        let Some(item) = item else { break };
                        let result = self.execute_item(&item).await;
                        if result_tx.send(result).await.is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let done = done.clone();
            scope.spawn(async move {
                while let Some(result) = result_rx.recv().await {
                    run.add_test_result(result);
                }
                done.cancel();
            });
        });
    }

    /// Executes one work item, maintaining the running-tests map around
    /// the invocation.
    async fn execute_item(&self, item: &ValidatorMetadata) -> TestResult {
        let key = item.key();
        self.running
            .write()
            .expect("running-tests lock poisoned")
            .insert(key.clone(), Instant::now());

        let result =
            invoker::invoke(&self.harness, item, &self.config.runner, &self.cancel).await;

        self.running
            .write()
            .expect("running-tests lock poisoned")
            .remove(&key);

        result
    }
}
