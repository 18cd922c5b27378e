//! Runtime Configuration Module
//!
//! Loads the node configuration from an optional TOML file with `SPINDLE_*`
//! environment overrides layered on top.
//!
//! ```toml
//! workers = 4
//! bind_address = "0.0.0.0"
//! payload_buckets = 16
//! log_level = "info"
//!
//! [listen]
//! packet = 0
//! ```
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `SPINDLE_LISTEN__PACKET=4`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};
use types::{Dict, DEFAULT_BUCKETS};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SPINDLE";

/// Default listen address; listeners accept on every interface
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Actor runtime settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub workers: usize,

    /// Address listeners bind to
    pub bind_address: String,

    /// Bucket count for payload dictionaries built by the runtime
    pub payload_buckets: usize,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Defaults merged under every listener's options
    pub listen: Dict,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut listen = Dict::new(DEFAULT_BUCKETS);
        let _ = listen.set_number("packet", 0.0);

        Self {
            workers: default_workers(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            payload_buckets: DEFAULT_BUCKETS,
            log_level: "info".to_string(),
            listen,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RuntimeConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .context("Failed to encode default configuration")?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "runtime config loaded");
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.payload_buckets == 0 {
            bail!("payload_buckets must be at least 1");
        }
        self.bind_address
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bind_address {:?}", self.bind_address))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.payload_buckets, 16);
        assert_eq!(config.listen.get_number("packet"), Some(0.0));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("spindle.toml");

        let config_content = r#"
workers = 3
bind_address = "127.0.0.1"
log_level = "debug"

[listen]
packet = 2
backlog = 64
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.payload_buckets, 16);
        assert_eq!(config.listen.get_number("packet"), Some(2.0));
        assert_eq!(config.listen.get_number("backlog"), Some(64.0));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(RuntimeConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = RuntimeConfig::from_toml_str("workers = 2").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(RuntimeConfig::from_toml_str("workers = 0").is_err());
        assert!(RuntimeConfig::from_toml_str("payload_buckets = 0").is_err());
        assert!(RuntimeConfig::from_toml_str(r#"bind_address = "nowhere""#).is_err());
    }
}
