//! Periodic "currently running" progress reporting.
//!
//! While the worker pool is active and progress is enabled, a ticker
//! emits one log record per interval summarizing the longest-running
//! tests. Workers maintain the shared running-tests map; this module
//! only reads snapshots of it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::RunningTests;

/// How many in-flight tests a progress record names.
pub const MAX_SHOWN_TESTS: usize = 5;

/// Formats the `max_show` longest-running tests as
/// `"{name} ({dur}s)"`, sorted by descending duration and joined with
/// `", "`. An empty map yields an empty string.
pub fn format_running_tests(running: &HashMap<String, Instant>, max_show: usize) -> String {
    let mut entries: Vec<(&str, Duration)> = running
        .iter()
        .map(|(name, started)| (name.as_str(), started.elapsed()))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(max_show);

    entries
        .iter()
        .map(|(name, dur)| format!("{} ({}s)", name, dur.as_secs()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Emits one progress record per tick until `done` fires.
///
/// Ticks with nothing in flight are silent.
pub(crate) async fn report_progress(
    running: RunningTests,
    interval: Duration,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = running.read().expect("running-tests lock poisoned").clone();
                if snapshot.is_empty() {
                    continue;
                }
                info!(
                    active = snapshot.len(),
                    running = %format_running_tests(&snapshot, MAX_SHOWN_TESTS),
                    "tests in progress"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_empty_map() {
        assert_eq!(format_running_tests(&HashMap::new(), 3), "");
    }

    #[test]
    fn test_format_sorts_by_descending_duration_and_truncates() {
        let now = Instant::now();
        let mut running = HashMap::new();
        running.insert("TestOne".to_string(), now - Duration::from_secs(1));
        running.insert("TestTwo".to_string(), now - Duration::from_secs(4));
        running.insert("TestThree".to_string(), now - Duration::from_secs(3));
        running.insert("TestFour".to_string(), now - Duration::from_secs(2));

        let formatted = format_running_tests(&running, 2);
        assert_eq!(formatted, "TestTwo (4s), TestThree (3s)");
    }

    #[test]
    fn test_format_shows_all_when_under_limit() {
        let now = Instant::now();
        let mut running = HashMap::new();
        running.insert("TestA".to_string(), now - Duration::from_secs(2));

        assert_eq!(format_running_tests(&running, 5), "TestA (2s)");
    }
}
