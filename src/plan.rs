//! Work planning: expansion of the gate/suite/test configuration into a
//! flat, ordered list of executable work items.
//!
//! Each configured test becomes one [`ValidatorMetadata`] work item. The
//! expansion preserves configuration order: a gate's direct tests come
//! first, followed by its suites in declaration order. Structural problems
//! in the configuration (missing package, ambiguous mode) are fatal here,
//! before anything is executed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Config, GateConfig, SuiteConfig, TestConfig};

/// Errors detected while expanding the configuration into a plan.
///
/// All of these are fatal: a run never starts from a malformed plan.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested gate does not exist in the configuration.
    #[error("gate '{0}' not found in configuration")]
    UnknownGate(String),

    /// A test entry has an empty package path.
    #[error("test in gate '{gate}' has an empty package")]
    MissingPackage {
        /// Gate the offending test belongs to.
        gate: String,
    },

    /// A test entry selects both single-function and package mode.
    #[error("test '{package}' in gate '{gate}' sets both name and run_all")]
    AmbiguousMode {
        /// Gate the offending test belongs to.
        gate: String,
        /// Package of the offending test.
        package: String,
    },

    /// A test entry selects neither single-function nor package mode.
    #[error("test '{package}' in gate '{gate}' sets neither name nor run_all")]
    MissingMode {
        /// Gate the offending test belongs to.
        gate: String,
        /// Package of the offending test.
        package: String,
    },
}

/// Identifies one dispatchable unit of work.
///
/// A work item is either *single-function* (`func_name` set, `run_all`
/// false) or *package-level* (`func_name` empty, `run_all` true, meaning
/// "run all tests in this package"). The two modes are mutually
/// exclusive; the planner enforces this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorMetadata {
    /// Unique identifier within the plan.
    pub id: String,

    /// Gate this work item belongs to.
    pub gate: String,

    /// Suite this work item belongs to, if any.
    pub suite: Option<String>,

    /// Package path handed to the test command.
    pub package: String,

    /// Test function to run. Empty in package mode.
    pub func_name: String,

    /// Whether this item runs every test in the package.
    pub run_all: bool,

    /// Timeout for this item, if any.
    pub timeout: Option<Duration>,
}

impl ValidatorMetadata {
    /// The key this item's result is stored under within its suite or
    /// gate: `"{package}::{func_name}"`, or just `"{package}"` for
    /// package-level items.
    pub fn key(&self) -> String {
        if self.func_name.is_empty() {
            self.package.clone()
        } else {
            format!("{}::{}", self.package, self.func_name)
        }
    }
}

/// Expands the full configuration into an ordered list of work items.
///
/// # Errors
///
/// Returns a [`ConfigError`] for the first structural problem found.
///
/// # Example
///
/// ```
/// use gauntlet::config::load_config_str;
/// use gauntlet::plan::plan;
///
/// let config = load_config_str(r#"
///     [[gates]]
///     id = "acceptance"
///     tests = [
///         { package = "./validators/base", name = "TestSync" },
///         { package = "./validators/node", run_all = true },
///     ]
/// "#)?;
///
/// let items = plan(&config)?;
/// assert_eq!(items.len(), 2);
/// assert_eq!(items[0].func_name, "TestSync");
/// assert!(items[1].run_all);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn plan(config: &Config) -> Result<Vec<ValidatorMetadata>, ConfigError> {
    let mut items = Vec::new();
    for gate in &config.gates {
        expand_gate(config, gate, &mut items)?;
    }
    Ok(items)
}

/// Expands a single gate into an ordered list of work items.
///
/// Used by the CLI's `--gate` filter and by flake-shake, which targets
/// one gate at a time.
pub fn plan_gate(config: &Config, gate_id: &str) -> Result<Vec<ValidatorMetadata>, ConfigError> {
    let gate = config
        .gate(gate_id)
        .ok_or_else(|| ConfigError::UnknownGate(gate_id.to_string()))?;

    let mut items = Vec::new();
    expand_gate(config, gate, &mut items)?;
    Ok(items)
}

fn expand_gate(
    config: &Config,
    gate: &GateConfig,
    items: &mut Vec<ValidatorMetadata>,
) -> Result<(), ConfigError> {
    for test in &gate.tests {
        items.push(expand_test(config, gate, None, test)?);
    }
    for (suite_id, suite) in &gate.suites {
        expand_suite(config, gate, suite_id, suite, items)?;
    }
    Ok(())
}

fn expand_suite(
    config: &Config,
    gate: &GateConfig,
    suite_id: &str,
    suite: &SuiteConfig,
    items: &mut Vec<ValidatorMetadata>,
) -> Result<(), ConfigError> {
    for test in &suite.tests {
        items.push(expand_test(config, gate, Some(suite_id), test)?);
    }
    Ok(())
}

fn expand_test(
    config: &Config,
    gate: &GateConfig,
    suite: Option<&str>,
    test: &TestConfig,
) -> Result<ValidatorMetadata, ConfigError> {
    if test.package.is_empty() {
        return Err(ConfigError::MissingPackage {
            gate: gate.id.clone(),
        });
    }

    let func_name = match (&test.name, test.run_all) {
        (Some(_), true) => {
            return Err(ConfigError::AmbiguousMode {
                gate: gate.id.clone(),
                package: test.package.clone(),
            });
        }
        (None, false) => {
            return Err(ConfigError::MissingMode {
                gate: gate.id.clone(),
                package: test.package.clone(),
            });
        }
        (Some(name), false) => name.clone(),
        (None, true) => String::new(),
    };

    let mut metadata = ValidatorMetadata {
        id: String::new(),
        gate: gate.id.clone(),
        suite: suite.map(str::to_string),
        package: test.package.clone(),
        func_name,
        run_all: test.run_all,
        timeout: test.timeout().or(config.runner.default_timeout()),
    };
    metadata.id = match &metadata.suite {
        Some(suite) => format!("{}/{}/{}", metadata.gate, suite, metadata.key()),
        None => format!("{}/{}", metadata.gate, metadata.key()),
    };
    Ok(metadata)
}
