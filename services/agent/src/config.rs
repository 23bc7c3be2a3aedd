//! Configuration for the agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Smallest accepted shutdown grace period.
const MIN_SHUTDOWN_GRACE_MS: u64 = 100;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON block-tree file loaded at startup and on SIGHUP.
    pub config_file: PathBuf,

    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Root of the per-component data directories.
    pub data_dir: PathBuf,

    /// Name of this node in the cluster.
    pub node_name: String,

    /// How long node and service tasks get to stop.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_file = lookup("CONFLUX_CONFIG_FILE")
            .map(PathBuf::from)
            .context("CONFLUX_CONFIG_FILE must be set")?;

        let log_level = lookup("CONFLUX_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let data_dir = lookup("CONFLUX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/conflux"));

        let node_name = lookup("CONFLUX_NODE_NAME").unwrap_or_else(|| "conflux-0".to_string());

        let shutdown_grace_ms = match lookup("CONFLUX_SHUTDOWN_GRACE_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid CONFLUX_SHUTDOWN_GRACE_MS: {raw:?}"))?,
            None => 10_000,
        };
        if shutdown_grace_ms < MIN_SHUTDOWN_GRACE_MS {
            bail!(
                "CONFLUX_SHUTDOWN_GRACE_MS must be at least {MIN_SHUTDOWN_GRACE_MS}, got {shutdown_grace_ms}"
            );
        }

        Ok(Self {
            config_file,
            log_level,
            data_dir,
            node_name,
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("CONFLUX_CONFIG_FILE", "/etc/conflux.json")]))
            .unwrap();

        assert_eq!(config.config_file, PathBuf::from("/etc/conflux.json"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/conflux"));
        assert_eq!(config.node_name, "conflux-0");
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_config_file_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("CONFLUX_CONFIG_FILE"));
    }

    #[rstest]
    #[case("250", Some(250))]
    #[case("100", Some(100))]
    #[case("99", None)]
    #[case("soon", None)]
    fn test_shutdown_grace(#[case] raw: &str, #[case] expected_ms: Option<u64>) {
        let result = Config::from_lookup(lookup(&[
            ("CONFLUX_CONFIG_FILE", "/etc/conflux.json"),
            ("CONFLUX_SHUTDOWN_GRACE_MS", raw),
        ]));

        match expected_ms {
            Some(ms) => assert_eq!(result.unwrap().shutdown_grace, Duration::from_millis(ms)),
            None => assert!(result.is_err()),
        }
    }
}
