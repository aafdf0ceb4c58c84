//! gauntlet CLI - declarative gate/suite/test orchestration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use gauntlet::config::{self, Config};
use gauntlet::report;
use gauntlet::runner::{GoTestHarness, Runner};

#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(about = "Declarative test-orchestration runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gauntlet.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured gates
    Run {
        /// Run a single gate instead of all of them
        #[arg(short, long)]
        gate: Option<String>,

        /// Override the configured worker-pool size
        #[arg(long)]
        concurrency: Option<i32>,

        /// Run work items one at a time, with no pool
        #[arg(long)]
        serial: bool,

        /// Emit periodic summaries of the longest-running tests
        #[arg(long)]
        progress: bool,
    },

    /// Re-run a gate repeatedly and classify test stability
    FlakeShake {
        /// Gate to exercise
        #[arg(short, long)]
        gate: String,

        /// Override the configured iteration count
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Write the full report as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            gate,
            concurrency,
            serial,
            progress,
        } => run(&cli.config, gate, concurrency, serial, progress).await,
        Commands::FlakeShake {
            gate,
            iterations,
            json,
        } => flake_shake(&cli.config, &gate, iterations, json).await,
        Commands::Validate => validate(&cli.config),
    }
}

fn load(config_path: &Path) -> Result<Config> {
    config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

fn build_runner(config: Config) -> Result<Runner> {
    let extra_args = config
        .runner
        .extra_args()
        .context("Invalid runner.extra_args")?;
    let harness = GoTestHarness::new().with_extra_args(extra_args);
    let runner = Runner::new(config, harness);

    // Ctrl-C cancels in-flight work; completed results are kept.
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling in-flight tests");
            cancel.cancel();
        }
    });

    Ok(runner)
}

async fn run(
    config_path: &Path,
    gate: Option<String>,
    concurrency: Option<i32>,
    serial: bool,
    progress: bool,
) -> Result<()> {
    let mut config = load(config_path)?;

    // Apply overrides
    if let Some(concurrency) = concurrency {
        config.runner.concurrency = concurrency;
    }
    if serial {
        config.runner.serial = true;
    }
    if progress {
        config.runner.show_progress = true;
    }

    let output_test_logs = config.runner.output_test_logs;
    let runner = build_runner(config)?;

    let result = match gate {
        Some(gate) => runner.run_gate(&gate).await?,
        None => runner.run().await?,
    };

    report::print_summary(&result, output_test_logs);
    std::process::exit(result.exit_code());
}

async fn flake_shake(
    config_path: &Path,
    gate: &str,
    iterations: Option<usize>,
    json: Option<PathBuf>,
) -> Result<()> {
    let config = load(config_path)?;
    let iterations = iterations.unwrap_or(config.runner.iterations);

    let runner = build_runner(config)?;
    let flake_report = gauntlet::run_flake_shake(&runner, gate, iterations).await?;

    report::print_flake_summary(&flake_report);

    if let Some(path) = json {
        let serialized = serde_json::to_string_pretty(&flake_report)?;
        std::fs::write(&path, serialized)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "flake-shake report written");
    }

    if flake_report.all_stable() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn validate(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let items = gauntlet::plan(&config).context("Configuration failed validation")?;

    let gates = config.gates.len();
    let suites: usize = config.gates.iter().map(|g| g.suites.len()).sum();
    info!(
        gates,
        suites,
        work_items = items.len(),
        "configuration is valid"
    );
    Ok(())
}
