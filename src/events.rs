//! Streaming event parser for the external test command's JSON log.
//!
//! The external test process emits newline-delimited JSON objects, one per
//! event. This module consumes a captured byte stream and synthesizes a
//! single [`TestResult`], including nested subtest results and timeout
//! attribution.
//!
//! The parser is a pure function from bytes + work-item metadata to a
//! result: no I/O, no clock reads beyond the timestamps in the stream.
//! That keeps it directly testable against recorded streams.
//!
//! # Event classification
//!
//! For a work item with function name `F`, an event is a *main-test*
//! event when its `Test` field equals `F`, when both are empty (package
//! mode), or when `F` is set, `Test` is empty, and the action is one of
//! the package-level bracket events (`start`/`pass`/`fail`) that frame a
//! single-test run. Otherwise an event with a non-empty `Test` that
//! contains `/` (canonical subtest notation), or any named event in
//! package mode, belongs to a subtest keyed by the full `Test` string.
//! Events matching neither are ignored.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::plan::ValidatorMetadata;
use crate::result::{TestResult, TestStatus};

/// Output markers scanned for in `output` events.
const SKIP_MARKER: &str = "--- SKIP:";
const FAIL_MARKERS: [&str; 3] = ["--- FAIL:", "Error:", "panic:"];

/// One decoded event from the external test stream.
///
/// Field names follow the wire format of the external tool, hence the
/// explicit renames.
#[derive(Debug, Clone, Deserialize)]
pub struct TestEvent {
    /// Event timestamp, when the stream provides one.
    #[serde(rename = "Time", default)]
    pub time: Option<DateTime<Utc>>,

    /// What happened.
    #[serde(rename = "Action")]
    pub action: Action,

    /// Package the event belongs to.
    #[serde(rename = "Package", default)]
    pub package: String,

    /// Test (or `parent/child` subtest) the event belongs to. Empty for
    /// package-level bracket events.
    #[serde(rename = "Test", default)]
    pub test: String,

    /// Output text, for `output` events.
    #[serde(rename = "Output", default)]
    pub output: String,

    /// Elapsed seconds reported by the tool on terminal events.
    #[serde(rename = "Elapsed", default)]
    pub elapsed: Option<f64>,
}

/// Event kinds emitted by the external test stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A test or package began executing.
    Start,
    /// A named test was scheduled to run.
    Run,
    /// Execution paused (parallelism bookkeeping).
    Pause,
    /// Execution continued.
    Cont,
    /// The target passed.
    Pass,
    /// The target failed.
    Fail,
    /// The target was skipped.
    Skip,
    /// A line of output was produced.
    Output,
}

/// Parses a captured event stream into a [`TestResult`].
///
/// Malformed lines are assumed to be stray non-JSON output and are
/// silently skipped; they never abort parsing. An empty input produces a
/// failed result with error `"no test output"`.
///
/// The returned result always carries the full raw stream in `stdout`,
/// so failures can be diagnosed after the fact regardless of log
/// display options.
pub fn parse(bytes: &[u8], metadata: &ValidatorMetadata) -> TestResult {
    if bytes.is_empty() {
        return TestResult::new(metadata.clone()).with_error("no test output");
    }

    let mut main = TargetState::default();
    let mut subtests: HashMap<String, TargetState> = HashMap::new();

    for line in bytes.split(|b| *b == b'\n') {
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_slice::<TestEvent>(line) else {
            continue;
        };

        if is_main_event(&event, &metadata.func_name) {
            main.apply(&event);
        } else if is_subtest_event(&event, &metadata.func_name) {
            subtests.entry(event.test.clone()).or_default().apply(&event);
        }
    }

    let mut result = TestResult::new(metadata.clone())
        .with_stdout(String::from_utf8_lossy(bytes).into_owned());

    let (status, error) = main.resolve();
    result.status = status;
    result.error = error;
    result.duration = main.duration();

    for (key, state) in subtests {
        let sub = build_subtest(metadata, &key, &state);
        result.subtests.insert(key, sub);
    }

    result
}

/// Parses a captured event stream, then applies the timeout overlay.
///
/// When the computed duration reaches `timeout`, the outer status is
/// overridden to Fail with `timed_out` set, and every subtest still in
/// Pass is recursively marked Fail + timed out. Already-failed subtests
/// retain their error.
pub fn parse_with_timeout(
    bytes: &[u8],
    metadata: &ValidatorMetadata,
    timeout: Duration,
) -> TestResult {
    let mut result = parse(bytes, metadata);
    if result.duration >= timeout {
        mark_timed_out(&mut result);
    }
    result
}

/// Applies the timeout overlay to an already-parsed result.
///
/// Used by the invoker when it killed the process itself and the
/// truncated stream carries no usable timing.
pub(crate) fn mark_timed_out(result: &mut TestResult) {
    result.status = TestStatus::Fail;
    result.timed_out = true;
    mark_subtests_timed_out(&mut result.subtests);
}

fn mark_subtests_timed_out(subtests: &mut HashMap<String, TestResult>) {
    for sub in subtests.values_mut() {
        if sub.status == TestStatus::Pass {
            sub.status = TestStatus::Fail;
            sub.timed_out = true;
        }
        mark_subtests_timed_out(&mut sub.subtests);
    }
}

fn is_main_event(event: &TestEvent, func_name: &str) -> bool {
    // Direct match also covers package mode, where both names are empty.
    event.test == func_name
        || (!func_name.is_empty()
            && event.test.is_empty()
            && matches!(event.action, Action::Start | Action::Pass | Action::Fail))
}

fn is_subtest_event(event: &TestEvent, func_name: &str) -> bool {
    !event.test.is_empty() && (event.test.contains('/') || func_name.is_empty())
}

fn build_subtest(metadata: &ValidatorMetadata, key: &str, state: &TargetState) -> TestResult {
    // True subtests display the trailing path; package-mode individual
    // tests keep their whole name.
    let display = match key.find('/') {
        Some(idx) => key[idx + 1..].to_string(),
        None => key.to_string(),
    };

    let mut sub = TestResult::new(ValidatorMetadata {
        id: format!("{}/{}", metadata.id, key),
        gate: metadata.gate.clone(),
        suite: metadata.suite.clone(),
        package: metadata.package.clone(),
        func_name: display,
        run_all: false,
        timeout: None,
    });

    let (status, error) = state.resolve();
    sub.status = status;
    sub.error = error;
    sub.duration = state.duration();
    sub
}

/// Accumulated state for one parse target (the main test or one subtest).
#[derive(Debug, Default)]
struct TargetState {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    elapsed: Option<f64>,
    status: Option<TestStatus>,
    saw_explicit_fail: bool,
    saw_skip_marker: bool,
    errors: Vec<String>,
}

impl TargetState {
    fn apply(&mut self, event: &TestEvent) {
        match event.action {
            Action::Start => {
                if self.start.is_none() {
                    self.start = event.time;
                }
            }
            Action::Pass => self.finish(TestStatus::Pass, event),
            Action::Fail => {
                self.saw_explicit_fail = true;
                self.finish(TestStatus::Fail, event);
            }
            Action::Skip => self.finish(TestStatus::Skip, event),
            Action::Output => {
                let text = event.output.trim();
                if text.contains(SKIP_MARKER) {
                    self.saw_skip_marker = true;
                }
                if FAIL_MARKERS.iter().any(|marker| text.contains(marker)) {
                    self.errors.push(text.to_string());
                }
            }
            Action::Run | Action::Pause | Action::Cont => {}
        }
    }

    fn finish(&mut self, status: TestStatus, event: &TestEvent) {
        self.status = Some(status);
        self.end = event.time;
        if event.elapsed.is_some() {
            self.elapsed = event.elapsed;
        }
    }

    /// Observed `end - start` when a start time was seen, otherwise the
    /// stream's `Elapsed`. Negative computations clamp to zero.
    fn duration(&self) -> Duration {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            (end - start).to_std().unwrap_or(Duration::ZERO)
        } else {
            self.elapsed
                .filter(|e| e.is_finite() && *e > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(Duration::ZERO)
        }
    }

    fn resolve(&self) -> (TestStatus, Option<String>) {
        // A skip marker wins unless an explicit fail event occurred.
        let status = if self.saw_skip_marker && !self.saw_explicit_fail {
            TestStatus::Skip
        } else {
            match self.status {
                Some(status) => status,
                None => TestStatus::Fail,
            }
        };

        let error = match status {
            TestStatus::Fail => {
                if !self.errors.is_empty() {
                    Some(self.errors.join("\n"))
                } else if self.status.is_none() {
                    Some("test did not report a result".to_string())
                } else {
                    Some("test failed".to_string())
                }
            }
            TestStatus::Pass | TestStatus::Skip => None,
        };

        (status, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(func_name: &str) -> ValidatorMetadata {
        ValidatorMetadata {
            id: format!("gate/./pkg::{func_name}"),
            gate: "gate".to_string(),
            suite: None,
            package: "./pkg".to_string(),
            func_name: func_name.to_string(),
            run_all: func_name.is_empty(),
            timeout: None,
        }
    }

    fn line(action: &str, test: &str, extras: serde_json::Value) -> String {
        let mut object = serde_json::json!({
            "Action": action,
            "Package": "./pkg",
        });
        if !test.is_empty() {
            object["Test"] = serde_json::json!(test);
        }
        if let Some(map) = extras.as_object() {
            for (k, v) in map {
                object[k] = v.clone();
            }
        }
        object.to_string()
    }

    fn stream(lines: &[String]) -> Vec<u8> {
        let mut bytes = lines.join("\n").into_bytes();
        bytes.push(b'\n');
        bytes
    }

    #[test]
    fn test_empty_output_fails() {
        let result = parse(b"", &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.error.as_deref(), Some("no test output"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let bytes = stream(&[
            "not json at all".to_string(),
            line("run", "TestA", serde_json::json!({})),
            "{broken".to_string(),
            line("pass", "TestA", serde_json::json!({"Elapsed": 0.25})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.duration, Duration::from_secs_f64(0.25));
    }

    #[test]
    fn test_skip_stream_with_elapsed_fallback() {
        // start / "--- SKIP:" output / skip with Elapsed 0.5
        let bytes = stream(&[
            line(
                "start",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:00Z"}),
            ),
            line(
                "output",
                "TestA",
                serde_json::json!({"Output": "--- SKIP: TestA (0.50s)\n"}),
            ),
            line("skip", "TestA", serde_json::json!({"Elapsed": 0.5})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Skip);
        assert_eq!(result.duration, Duration::from_secs_f64(0.5));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_skip_marker_does_not_override_explicit_fail() {
        let bytes = stream(&[
            line(
                "output",
                "TestA",
                serde_json::json!({"Output": "--- SKIP: TestA/child\n"}),
            ),
            line("fail", "TestA", serde_json::json!({"Elapsed": 1.0})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
    }

    #[test]
    fn test_duration_prefers_observed_timestamps() {
        let bytes = stream(&[
            line(
                "start",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:00Z"}),
            ),
            line(
                "pass",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:03Z", "Elapsed": 99.0}),
            ),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.duration, Duration::from_secs(3));
    }

    #[test]
    fn test_negative_duration_clamps_to_zero() {
        let bytes = stream(&[
            line(
                "start",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:10Z"}),
            ),
            line(
                "pass",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:05Z"}),
            ),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.duration, Duration::ZERO);
    }

    #[test]
    fn test_package_bracket_events_frame_single_test() {
        // A single-function run still sees package-level start/fail
        // brackets with an empty Test field.
        let bytes = stream(&[
            line(
                "start",
                "",
                serde_json::json!({"Time": "2025-01-01T00:00:00Z"}),
            ),
            line("run", "TestA", serde_json::json!({})),
            line(
                "output",
                "TestA",
                serde_json::json!({"Output": "    Error: expected 3 peers, got 1\n"}),
            ),
            line("fail", "TestA", serde_json::json!({"Elapsed": 2.0})),
            line("fail", "", serde_json::json!({"Elapsed": 2.1})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.error.as_deref().unwrap().contains("Error: expected 3 peers"));
        assert!(result.subtests.is_empty());
    }

    #[test]
    fn test_package_mode_collects_individual_tests_as_subtests() {
        let bytes = stream(&[
            line(
                "start",
                "",
                serde_json::json!({"Time": "2025-01-01T00:00:00Z"}),
            ),
            line("run", "TestX", serde_json::json!({})),
            line("pass", "TestX", serde_json::json!({"Elapsed": 0.1})),
            line("run", "TestY", serde_json::json!({})),
            line(
                "output",
                "TestY",
                serde_json::json!({"Output": "--- FAIL: TestY (1.20s)\n"}),
            ),
            line("fail", "TestY", serde_json::json!({"Elapsed": 1.2})),
            line(
                "pass",
                "",
                serde_json::json!({"Time": "2025-01-01T00:00:02Z", "Elapsed": 2.0}),
            ),
        ]);

        let result = parse(&bytes, &meta(""));
        // Package bracket reported pass, so the parent passes even with a
        // failing member; the member keeps its own failure.
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.subtests.len(), 2);
        assert_eq!(result.subtests["TestX"].status, TestStatus::Pass);

        let failed = &result.subtests["TestY"];
        assert_eq!(failed.status, TestStatus::Fail);
        assert_eq!(failed.duration, Duration::from_secs_f64(1.2));
        assert!(failed.error.as_deref().unwrap().contains("--- FAIL: TestY"));
        // Package-mode members keep their whole name.
        assert_eq!(failed.metadata.func_name, "TestY");
    }

    #[test]
    fn test_subtest_slash_notation_and_display_name() {
        let bytes = stream(&[
            line("run", "TestA", serde_json::json!({})),
            line("run", "TestA/reorg/deep", serde_json::json!({})),
            line("pass", "TestA/reorg/deep", serde_json::json!({"Elapsed": 0.3})),
            line("pass", "TestA", serde_json::json!({"Elapsed": 0.4})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Pass);
        let sub = &result.subtests["TestA/reorg/deep"];
        assert_eq!(sub.metadata.func_name, "reorg/deep");
        assert_eq!(sub.duration, Duration::from_secs_f64(0.3));
    }

    #[test]
    fn test_unrelated_top_level_events_ignored() {
        let bytes = stream(&[
            line("run", "TestOther", serde_json::json!({})),
            line("fail", "TestOther", serde_json::json!({"Elapsed": 5.0})),
            line("pass", "TestA", serde_json::json!({"Elapsed": 0.1})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Pass);
        assert!(result.subtests.is_empty());
    }

    #[test]
    fn test_panic_marker_lands_in_error() {
        let bytes = stream(&[
            line(
                "output",
                "TestA",
                serde_json::json!({"Output": "panic: runtime error: index out of range\n"}),
            ),
            line("fail", "TestA", serde_json::json!({"Elapsed": 0.1})),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.error.as_deref().unwrap().starts_with("panic:"));
    }

    #[test]
    fn test_fail_without_markers_still_sets_error() {
        let bytes = stream(&[line("fail", "TestA", serde_json::json!({"Elapsed": 0.1}))]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.error.as_deref(), Some("test failed"));
    }

    #[test]
    fn test_stream_without_terminal_status_fails() {
        let bytes = stream(&[
            line("run", "TestA", serde_json::json!({})),
            line(
                "output",
                "TestA",
                serde_json::json!({"Output": "still going\n"}),
            ),
        ]);

        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.error.as_deref(), Some("test did not report a result"));
    }

    #[test]
    fn test_stdout_always_captured() {
        let bytes = stream(&[line("pass", "TestA", serde_json::json!({"Elapsed": 0.1}))]);
        let result = parse(&bytes, &meta("TestA"));
        assert_eq!(result.stdout.as_bytes(), &bytes[..]);
    }

    #[test]
    fn test_parse_is_idempotent_over_observable_fields() {
        let bytes = stream(&[
            line("run", "TestA", serde_json::json!({})),
            line("run", "TestA/one", serde_json::json!({})),
            line("pass", "TestA/one", serde_json::json!({"Elapsed": 0.2})),
            line("pass", "TestA", serde_json::json!({"Elapsed": 0.5})),
        ]);

        let first = parse(&bytes, &meta("TestA"));
        let second = parse(&bytes, &meta("TestA"));
        assert_eq!(first.status, second.status);
        assert_eq!(first.duration, second.duration);
        assert_eq!(first.subtests.len(), second.subtests.len());
    }

    #[test]
    fn test_timeout_overlay_marks_passing_subtests() {
        let bytes = stream(&[
            line(
                "start",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:00Z"}),
            ),
            line("run", "TestA/ok", serde_json::json!({})),
            line("pass", "TestA/ok", serde_json::json!({"Elapsed": 1.0})),
            line(
                "output",
                "TestA/broken",
                serde_json::json!({"Output": "Error: boom\n"}),
            ),
            line("fail", "TestA/broken", serde_json::json!({"Elapsed": 0.5})),
            line(
                "pass",
                "TestA",
                serde_json::json!({"Time": "2025-01-01T00:00:03Z"}),
            ),
        ]);

        let result = parse_with_timeout(&bytes, &meta("TestA"), Duration::from_secs(2));
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.timed_out);

        let ok = &result.subtests["TestA/ok"];
        assert_eq!(ok.status, TestStatus::Fail);
        assert!(ok.timed_out);

        // Already-failed subtests retain their error, untouched.
        let broken = &result.subtests["TestA/broken"];
        assert_eq!(broken.status, TestStatus::Fail);
        assert!(!broken.timed_out);
        assert_eq!(broken.error.as_deref(), Some("Error: boom"));
    }

    #[test]
    fn test_timeout_overlay_not_applied_under_limit() {
        let bytes = stream(&[line("pass", "TestA", serde_json::json!({"Elapsed": 0.5}))]);

        let result = parse_with_timeout(&bytes, &meta("TestA"), Duration::from_secs(2));
        assert_eq!(result.status, TestStatus::Pass);
        assert!(!result.timed_out);
    }

    #[test]
    fn test_timed_out_iff_duration_reaches_limit() {
        let at_limit = stream(&[line("pass", "TestA", serde_json::json!({"Elapsed": 2.0}))]);
        let result = parse_with_timeout(&at_limit, &meta("TestA"), Duration::from_secs(2));
        assert!(result.timed_out);
        assert_eq!(result.status, TestStatus::Fail);
    }
}
