//! Configuration model.
//!
//! Loaded by `infrastructure::config::ConfigLoader`; every knob has a
//! programmatic default so a bare working directory works out of the box.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the engine's data directory inside the working directory
    pub data_dir: String,
    /// Expected profile filename shape, kept for external profile tooling
    pub profile_filename_fmt: String,
    pub jobscript_ext: String,
    pub variable_file_ext: String,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Store filename inside the data directory
    pub filename: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// pretty | json
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: ".batchflow".to_string(),
            profile_filename_fmt: "<<profile_order>>.<<profile_name>>.yml".to_string(),
            jobscript_ext: ".sh".to_string(),
            variable_file_ext: ".txt".to_string(),
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            filename: "workflow.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 30_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_dir, ".batchflow");
        assert_eq!(config.database.filename, "workflow.db");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("logging:\n  level: debug\n").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.max_connections, 5);
    }
}
