//! # Configuration Management Module
//!
//! Optional TOML configuration for meshbackup. Every field has a default, so running without a
//! config file behaves exactly like an empty one.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! port = "/dev/cu.usbmodem1301"
//! baud_rate = 115200
//! connect_timeout_secs = 30
//! hop_limit = 3
//!
//! [backup]
//! settle_delay_ms = 2000
//!
//! [logging]
//! level = "warn"
//! # file = "meshbackup.log"
//! ```
//!
//! ## Precedence
//!
//! CLI args > config file > built-in defaults.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::meshtastic::LinkSettings;

/// Serial device used when neither the CLI nor the config names one.
pub const DEFAULT_PORT: &str = "/dev/cu.usbmodem1301";
pub const DEFAULT_BAUD_RATE: u32 = 115200;
/// Pause between sending the backup request and closing the link.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_HOP_LIMIT: u32 = 3;
/// Largest hop limit the firmware accepts.
pub const MAX_HOP_LIMIT: u32 = 7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Seconds to wait for the device configuration handshake after the port opens.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Delay before teardown so the request is flushed to the radio (ms).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_hop_limit() -> u32 {
    DEFAULT_HOP_LIMIT
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            connect_timeout_secs: default_connect_timeout_secs(),
            hop_limit: default_hop_limit(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Configuration values that parse but cannot be used.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device.baud_rate must be greater than zero")]
    ZeroBaudRate,

    #[error("device.hop_limit must be at most {max} (got {got})")]
    HopLimitTooLarge { got: u32, max: u32 },

    #[error("device.connect_timeout_secs must be greater than zero")]
    ZeroConnectTimeout,

    #[error("device.connect_timeout_secs must be at most {max} (got {got})")]
    ConnectTimeoutTooLarge { got: u64, max: u64 },

    #[error("logging.level '{0}' is not one of off, error, warn, info, debug, trace")]
    UnknownLogLevel(String),
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.trim().parse().ok()
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.device.hop_limit > MAX_HOP_LIMIT {
            return Err(ConfigError::HopLimitTooLarge {
                got: self.device.hop_limit,
                max: MAX_HOP_LIMIT,
            });
        }
        if self.device.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if self.device.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS {
            return Err(ConfigError::ConnectTimeoutTooLarge {
                got: self.device.connect_timeout_secs,
                max: MAX_CONNECT_TIMEOUT_SECS,
            });
        }
        if self.logging.level_filter().is_none() {
            return Err(ConfigError::UnknownLogLevel(self.logging.level.clone()));
        }
        Ok(())
    }

    /// Port to open: the CLI value when given, else the configured one. No format validation.
    pub fn resolve_port(&self, cli_port: Option<&str>) -> String {
        match cli_port {
            Some(port) => port.to_string(),
            None if !self.device.port.is_empty() => self.device.port.clone(),
            None => DEFAULT_PORT.to_string(),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.backup.settle_delay_ms)
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.device.baud_rate,
            connect_timeout: Duration::from_secs(self.device.connect_timeout_secs),
            hop_limit: self.device.hop_limit,
        }
    }
}
