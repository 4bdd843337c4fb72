//! Configuration loading with hierarchical merging.
//!
//! Precedence (lowest to highest):
//! 1. Programmatic defaults
//! 2. `config.yaml` inside the data directory
//! 3. Environment variables (`BATCHFLOW_*` prefix)
//!
//! The data directory itself comes from `BATCHFLOW_DATA_DIR` when set,
//! falling back to `.batchflow` under the working directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database filename cannot be empty")]
    EmptyDatabaseFilename,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the data directory name: environment override first.
    pub fn data_dir_name() -> String {
        std::env::var("BATCHFLOW_DATA_DIR").unwrap_or_else(|_| ".batchflow".to_string())
    }

    /// Load configuration for a working directory.
    pub fn load(workdir: &Path) -> Result<Config> {
        let data_dir = PathBuf::from(Self::data_dir_name());
        let config_file = if data_dir.is_absolute() {
            data_dir.join("config.yaml")
        } else {
            workdir.join(&data_dir).join("config.yaml")
        };

        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&config_file))
            .merge(Env::prefixed("BATCHFLOW_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        config.data_dir = Self::data_dir_name();
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.filename.is_empty() {
            return Err(ConfigError::EmptyDatabaseFilename);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }
        Ok(())
    }
}
