//! Application Configuration
//!
//! This module provides configuration management for the binary data store,
//! supporting YAML configuration files with sensible defaults and
//! environment overrides.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BinaryDataError, Result};
use crate::marker::MINUTE_MS;
use crate::storage::config::StorageConfig;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Main store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Object lifetimes
    pub ttl: TtlConfig,
    /// Background sweep configuration
    pub sweep: SweepConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Object lifetimes, in minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Delay between `mark_for_deletion` and the payload becoming collectable
    pub binary_data_ttl: u64,
    /// Retention added on top of the next hour boundary for persistence markers
    pub persisted_binary_data_ttl: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            binary_data_ttl: 60,
            persisted_binary_data_ttl: 1440,
        }
    }
}

impl TtlConfig {
    pub fn binary_data_ttl_ms(&self) -> i64 {
        minutes_to_ms(self.binary_data_ttl)
    }

    pub fn persisted_binary_data_ttl_ms(&self) -> i64 {
        minutes_to_ms(self.persisted_binary_data_ttl)
    }

    /// Period of the deletion sweep
    pub fn deletion_interval(&self) -> Duration {
        Duration::from_secs(self.binary_data_ttl.saturating_mul(60))
    }

    /// Period of the persistence sweep
    pub fn persistence_interval(&self) -> Duration {
        Duration::from_secs(self.persisted_binary_data_ttl.saturating_mul(60))
    }
}

fn minutes_to_ms(minutes: u64) -> i64 {
    i64::try_from(minutes).unwrap_or(i64::MAX).saturating_mul(MINUTE_MS)
}

/// Background sweep configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Start the periodic sweeps when the store is initialised
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "binary_data_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `config.yaml` from the working directory, use defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from `path` and apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| BinaryDataError::read(path, e))?;
            let config: AppConfig = serde_yaml::from_str(&content)
                .map_err(|e| BinaryDataError::Config(format!("{}: {}", path.display(), e)))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Apply environment variables on top of `self`
    pub fn with_env_overrides(mut self) -> Self {
        self.storage = self.storage.with_env_overrides();
        if let Some(ttl) = env_minutes("BINARY_DATA_TTL") {
            self.ttl.binary_data_ttl = ttl;
        }
        if let Some(ttl) = env_minutes("PERSISTED_BINARY_DATA_TTL") {
            self.ttl.persisted_binary_data_ttl = ttl;
        }
        self
    }
}

fn env_minutes(name: &str) -> Option<u64> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(minutes) => {
            info!("Using {}={} minutes from environment", name, minutes);
            Some(minutes)
        }
        Err(e) => {
            warn!("Ignoring invalid {}={:?}: {}", name, raw, e);
            None
        }
    }
}
