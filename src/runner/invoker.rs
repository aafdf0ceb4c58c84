//! Test invocation: spawning one external test process per work item and
//! turning its captured stream into a [`TestResult`].
//!
//! The coupling to the external tool is the [`TestHarness`] trait: a
//! harness turns a work item into a command line. Any command whose
//! stdout is the documented newline-delimited JSON event stream is a
//! valid harness; [`GoTestHarness`] is the stock implementation.
//!
//! The invoker owns process lifecycle: it spawns the command in its own
//! process group, captures stdout line by line, enforces the item's
//! timeout (SIGTERM, short grace, SIGKILL), and observes cancellation.

use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::select;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::RunnerConfig;
use crate::events::{self, Action, TestEvent};
use crate::plan::ValidatorMetadata;
use crate::result::TestResult;

/// Environment variable forwarded into each spawned test process.
pub const TEST_LOG_LEVEL_ENV: &str = "TEST_LOG_LEVEL";

/// How long a terminated process gets to exit before it is killed.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// A command line produced by a [`TestHarness`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
}

/// Turns a work item into an executable command.
///
/// This is the extension point for new test runners: the engine is
/// agnostic to the test binary as long as its stdout is the documented
/// event stream.
pub trait TestHarness: Send + Sync {
    /// Builds the command that executes the given work item.
    fn command_for(&self, metadata: &ValidatorMetadata) -> CommandSpec;
}

/// Stock harness invoking `go test` with JSON streaming output.
///
/// Single-function items get a `-run ^Func$` filter; package-level items
/// run the whole package. The item's timeout, when set, is also passed
/// to the tool so it can unwind with a usable event stream before the
/// invoker resorts to killing it.
#[derive(Debug, Clone, Default)]
pub struct GoTestHarness {
    extra_args: Vec<String>,
}

impl GoTestHarness {
    /// Creates a harness with no extra arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends extra arguments to every generated command.
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

impl TestHarness for GoTestHarness {
    fn command_for(&self, metadata: &ValidatorMetadata) -> CommandSpec {
        let mut args = vec![
            "test".to_string(),
            "-json".to_string(),
            "-count=1".to_string(),
            "-v".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        if !metadata.func_name.is_empty() {
            args.push("-run".to_string());
            args.push(format!("^{}$", metadata.func_name));
        }
        if let Some(timeout) = metadata.timeout {
            args.push(format!("-timeout={}s", timeout.as_secs()));
        }
        args.push(metadata.package.clone());

        CommandSpec {
            program: "go".to_string(),
            args,
        }
    }
}

/// Errors raised while managing the external process.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The test process could not be spawned.
    #[error("failed to start test process '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// How a capture ended.
enum Capture {
    /// The process exited on its own; full stream captured.
    Completed(String),
    /// The per-item timeout expired and the process was killed.
    TimedOut(String),
    /// Cancellation was observed and the process was killed.
    Cancelled(String),
}

/// Executes one work item and synthesizes its result.
///
/// Never returns an error: spawn failures, timeouts, and cancellation
/// all become failed results so the run can continue.
pub async fn invoke<H: TestHarness + ?Sized>(
    harness: &H,
    metadata: &ValidatorMetadata,
    options: &RunnerConfig,
    cancel: &CancellationToken,
) -> TestResult {
    if cancel.is_cancelled() {
        return TestResult::new(metadata.clone()).with_error("cancelled");
    }

    let spec = harness.command_for(metadata);
    debug!(test = %metadata.key(), program = %spec.program, args = ?spec.args, "invoking");
    let started = Instant::now();

    match capture(&spec, metadata, options, cancel).await {
        Ok(Capture::Completed(buf)) => match metadata.timeout {
            Some(timeout) => events::parse_with_timeout(buf.as_bytes(), metadata, timeout),
            None => events::parse(buf.as_bytes(), metadata),
        },
        Ok(Capture::TimedOut(buf)) => {
            let timeout = metadata.timeout.unwrap_or_default();
            let mut result = events::parse_with_timeout(buf.as_bytes(), metadata, timeout);
            if !result.timed_out {
                // The stream was cut before any terminal event carried
                // timing, so the overlay never saw the real duration.
                result.duration = started.elapsed();
                events::mark_timed_out(&mut result);
            }
            result
        }
        Ok(Capture::Cancelled(buf)) => {
            let mut result = TestResult::new(metadata.clone())
                .with_error("cancelled")
                .with_stdout(buf);
            result.duration = started.elapsed();
            result
        }
        Err(err @ InvokeError::Spawn { .. }) => {
            warn!(test = %metadata.key(), error = %err, "invocation failed");
            TestResult::new(metadata.clone()).with_error(err.to_string())
        }
    }
}

/// Spawns the command and captures its stdout until exit, timeout, or
/// cancellation.
async fn capture(
    spec: &CommandSpec,
    metadata: &ValidatorMetadata,
    options: &RunnerConfig,
    cancel: &CancellationToken,
) -> Result<Capture, InvokeError> {
    let mut command = tokio::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    if let Some(level) = &options.test_log_level {
        command.env(TEST_LOG_LEVEL_ENV, level);
    }

    let mut child = command.spawn().map_err(|source| InvokeError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
    let stderr = BufReader::new(child.stderr.take().expect("stderr was piped"));
    let stdout_lines = LinesStream::new(stdout.lines()).map(Line::Stdout);
    let stderr_lines = LinesStream::new(stderr.lines()).map(Line::Stderr);
    let mut merged = futures::stream::select(stdout_lines, stderr_lines);

    let timeout = async {
        match metadata.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timeout);

    let mut buf = String::new();

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!(test = %metadata.key(), "cancelled; terminating test process");
                kill_gracefully(&mut child).await;
                return Ok(Capture::Cancelled(buf));
            }
            _ = &mut timeout => {
                warn!(
                    test = %metadata.key(),
                    timeout_secs = metadata.timeout.unwrap_or_default().as_secs(),
                    "test timed out; terminating test process"
                );
                kill_gracefully(&mut child).await;
                return Ok(Capture::TimedOut(buf));
            }
            next = merged.next() => {
                match next {
                    Some(Line::Stdout(line)) => {
                        let line = line.unwrap_or_default();
                        if options.output_realtime_logs {
                            forward_output_event(&line);
                        }
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                    Some(Line::Stderr(line)) => {
                        trace!(test = %metadata.key(), line = %line.unwrap_or_default(), "stderr");
                    }
                    None => break,
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) if !status.success() => {
            debug!(test = %metadata.key(), ?status, "test process exited non-zero");
        }
        Ok(_) => {}
        Err(err) => debug!(test = %metadata.key(), error = %err, "failed to reap test process"),
    }

    Ok(Capture::Completed(buf))
}

enum Line {
    Stdout(Result<String, std::io::Error>),
    Stderr(Result<String, std::io::Error>),
}

/// Re-emits a decodable `output` event as a live log record.
///
/// Strictly additive: the buffered stream is parsed identically whether
/// or not forwarding is enabled.
fn forward_output_event(line: &str) {
    if let Ok(event) = serde_json::from_str::<TestEvent>(line)
        && event.action == Action::Output
    {
        let output = event.output.trim_end();
        if !output.is_empty() {
            info!(test = %event.test, output = %output, "test output");
        }
    }
}

/// Terminates the child's process group: SIGTERM, a short grace period,
/// then SIGKILL. Non-Unix targets fall back to an immediate kill.
async fn kill_gracefully(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);
            if tokio::time::timeout(KILL_GRACE_PERIOD, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.wait().await;
            return;
        }
    }

    let _ = child.kill().await;
}
