//! Configuration loading for gauntlet.
//!
//! This module provides functions for loading gauntlet configuration from
//! TOML files or strings. The schema itself lives in [`schema`]; structural
//! validation of the gate tree happens in the planner, so a loadable file
//! can still be rejected at planning time.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads gauntlet configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use gauntlet::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("gauntlet.toml"))?;
/// println!("{} gates configured", config.gates.len());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads gauntlet configuration from a TOML string.
///
/// Useful for testing, embedding configuration, or generating configuration
/// programmatically.
///
/// # Example
///
/// ```
/// use gauntlet::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [runner]
///     concurrency = 4
///
///     [[gates]]
///     id = "acceptance"
///     tests = [{ package = "./validators/base", run_all = true }]
/// "#)?;
///
/// assert_eq!(config.runner.concurrency, 4);
/// assert_eq!(config.gates.len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [runner]
            serial = true
            test_log_level = "debug"

            [[gates]]
            id = "base"
            description = "base gate"

            [[gates.tests]]
            package = "./validators/node"
            run_all = true
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.runner.serial);
        assert_eq!(config.runner.test_log_level.as_deref(), Some("debug"));
        assert_eq!(config.gates[0].id, "base");
        assert!(config.gates[0].tests[0].run_all);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/gauntlet.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_str_rejects_bad_toml() {
        assert!(load_config_str("[[gates]\nid = ").is_err());
    }

    #[test]
    fn test_gate_lookup() {
        let config = load_config_str(
            r#"
            [[gates]]
            id = "alpha"

            [[gates]]
            id = "beta"
            "#,
        )
        .unwrap();

        assert!(config.gate("beta").is_some());
        assert!(config.gate("gamma").is_none());
    }
}
