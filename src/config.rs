//! Configuration management for the DNS-over-DTLS client
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, a TOML file and
//! environment variables.

use anyhow::{anyhow, ensure, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::dns::{DodtlsConfig, MIN_REPLY_LEN};

/// The main configuration struct.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level, as a `tracing` filter directive.
    pub log_level: String,
    /// Query retry and buffer settings.
    pub dodtls: DodtlsConfig,
    /// Configuration for the resolution cache.
    pub cache: CacheConfig,
    /// Configuration for the credential store.
    pub credentials: CredentialConfig,
}

/// Configuration for the resolution cache.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// The maximum number of cached names.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 8 }
    }
}

/// Configuration for the credential store.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CredentialConfig {
    /// The maximum number of credentials held at once.
    pub capacity: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self { capacity: 2 }
    }
}

impl Config {
    /// Loads the configuration from the specified file.
    ///
    /// Values missing from the file keep their defaults. Environment
    /// variables override both, e.g. `DODTLS_DODTLS__RETRIES=4`.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path.as_ref()))
            .merge(Env::prefixed("DODTLS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the resolver cannot operate with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.dodtls.retries >= 1, "dodtls.retries must be at least 1");
        ensure!(self.dodtls.timeout_ms >= 1, "dodtls.timeout_ms must be at least 1");
        ensure!(
            self.dodtls.msg_len > MIN_REPLY_LEN,
            "dodtls.msg_len must exceed {} bytes",
            MIN_REPLY_LEN
        );
        ensure!(self.cache.max_entries >= 1, "cache.max_entries must be at least 1");
        Ok(())
    }

    /// Installs a global `tracing` subscriber filtered by `RUST_LOG`, or by
    /// `log_level` when that is unset.
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow!(e))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dodtls: DodtlsConfig::default(),
            cache: CacheConfig::default(),
            credentials: CredentialConfig::default(),
        }
    }
}
