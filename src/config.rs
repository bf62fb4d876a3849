use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::config::NetworkConfig;
use crate::protocol::DEFAULT_CHUNK_SIZE;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
}

/// Session-level settings shared by both roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory the responder resolves requested names against
    pub serve_root: PathBuf,
    pub chunk_size: usize,
    /// Per-operation stall limit for responder sessions; 0 disables it
    pub idle_timeout_secs: u64,
    /// How long shutdown waits for running sessions before aborting them
    pub shutdown_grace_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            serve_root: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl TransferConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl AppConfig {
    /// Load configuration from file, or defaults when no file exists
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk size must be greater than 0".to_string(),
            ));
        }

        if self.transfer.serve_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("serve root must not be empty".to_string()));
        }

        Ok(())
    }
}
