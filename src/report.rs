//! Console summaries of run and flake-shake results.
//!
//! Structured serialization of the result tree is the report writers'
//! business; this module only prints the human-facing end-of-run
//! summary.

use console::style;

use crate::flake::{FlakeShakeReport, Recommendation};
use crate::result::{GateResult, RunnerResult, TestResult, TestStatus};

/// Prints an end-of-run summary of the whole result tree.
///
/// Captured test output is shown for failed tests only when
/// `output_test_logs` is set; the bytes are always present on the
/// results either way.
pub fn print_summary(run: &RunnerResult, output_test_logs: bool) {
    println!();
    println!(
        "Run {} ({})",
        run.run_id,
        if run.is_parallel { "parallel" } else { "serial" }
    );

    let mut gates: Vec<&GateResult> = run.gates.values().collect();
    gates.sort_by(|a, b| a.id.cmp(&b.id));

    for gate in gates {
        println!();
        println!("Gate {} {}", styled_status(gate.status), style(&gate.id).bold());
        if !gate.description.is_empty() {
            println!("  {}", style(&gate.description).dim());
        }

        let mut tests: Vec<(&String, &TestResult)> = gate.tests.iter().collect();
        tests.sort_by(|a, b| a.0.cmp(b.0));
        for (key, test) in tests {
            print_test_line(key, test, 1);
        }

        let mut suites: Vec<&String> = gate.suites.keys().collect();
        suites.sort();
        for suite_id in suites {
            let suite = &gate.suites[suite_id];
            println!("  Suite {} {}", styled_status(suite.status), suite_id);
            let mut tests: Vec<(&String, &TestResult)> = suite.tests.iter().collect();
            tests.sort_by(|a, b| a.0.cmp(b.0));
            for (key, test) in tests {
                print_test_line(key, test, 2);
            }
        }
    }

    println!();
    println!("Results:");
    println!("  Total:   {}", run.stats.total);
    println!("  Passed:  {}", style(run.stats.passed).green());
    println!("  Failed:  {}", style(run.stats.failed).red());
    println!("  Skipped: {}", style(run.stats.skipped).yellow());
    println!("  Duration: {:?} (wall clock {:?})", run.duration, run.wall_clock_time);

    if run.status == TestStatus::Fail {
        println!();
        println!("{}", style("Some tests failed.").red().bold());
        print_failures(run, output_test_logs);
    } else {
        println!();
        println!("{}", style("All gates passed.").green().bold());
    }
}

fn styled_status(status: TestStatus) -> console::StyledObject<&'static str> {
    match status {
        TestStatus::Pass => style("PASS").green(),
        TestStatus::Fail => style("FAIL").red(),
        TestStatus::Skip => style("SKIP").yellow(),
    }
}

fn print_test_line(key: &str, test: &TestResult, indent: usize) {
    let pad = "  ".repeat(indent);
    let timing = if test.timed_out {
        format!("{:?}, timed out", test.duration)
    } else {
        format!("{:?}", test.duration)
    };
    println!("{pad}{} {} ({timing})", styled_status(test.status), key);
}

fn print_failures(run: &RunnerResult, output_test_logs: bool) {
    println!();
    println!("Failed tests:");
    for (key, test) in run.all_tests() {
        if test.status != TestStatus::Fail {
            continue;
        }
        println!("  - {key}");
        if let Some(error) = &test.error {
            for line in error.lines() {
                println!("    {}", style(line).dim());
            }
        }
        if output_test_logs && !test.stdout.is_empty() {
            println!("    {}", style("output:").dim());
            for line in test.stdout.lines() {
                println!("      {line}");
            }
        }
    }
}

/// Prints a per-test stability table for a flake-shake report.
pub fn print_flake_summary(report: &FlakeShakeReport) {
    println!();
    println!(
        "Flake-shake of gate '{}': {}/{} iterations completed",
        report.gate, report.total_runs, report.iterations
    );
    println!();

    for test in &report.tests {
        let verdict = match test.recommendation {
            Recommendation::Stable => style("STABLE").green(),
            Recommendation::Unstable => style("UNSTABLE").red().bold(),
        };
        let name = if test.test_name.is_empty() {
            test.package.clone()
        } else {
            format!("{}::{}", test.package, test.test_name)
        };
        println!(
            "  {verdict:>8}  {name}  {:.1}% ({} pass / {} fail / {} skip, avg {:?})",
            test.pass_rate, test.passes, test.failures, test.skipped, test.avg_duration
        );
    }

    println!();
    if report.all_stable() {
        println!("{}", style("All tests stable.").green().bold());
    } else {
        println!("{}", style("Unstable tests detected.").red().bold());
    }
}
