//! Configuration for the Modbus/Redis bridge.

use rtucache_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// TTL applied when the configured one is not positive.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] rtucache_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// Serial bus settings
    pub modbus: SerialConfig,

    /// Redis cache settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Device catalog settings
    pub catalog: CatalogConfig,

    /// Seconds to sleep between two cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval() -> u64 {
    1
}

/// Modbus RTU serial line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub device: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl SerialConfig {
    /// Parse the configured parity.
    ///
    /// Accepts the long names as well as the single-letter `N`/`E`/`O` forms.
    pub fn parity(&self) -> Option<Parity> {
        match self.parity.to_lowercase().as_str() {
            "none" | "n" => Some(Parity::None),
            "even" | "e" => Some(Parity::Even),
            "odd" | "o" => Some(Parity::Odd),
            _ => None,
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Redis cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Host address (IP or hostname)
    #[serde(default = "default_redis_host")]
    pub host: String,
    /// TCP port (default: 6379)
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// Expiry for every key written by the bridge; non-positive means 60
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
    /// Delay between two reachability probes at startup
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Timeout of a single reachability probe in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Give up after this many failed probes (default: never)
    #[serde(default)]
    pub probe_attempts: Option<u32>,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_ttl_secs() -> i64 {
    DEFAULT_TTL_SECS as i64
}

fn default_probe_interval() -> u64 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            ttl_secs: default_ttl_secs(),
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_attempts: None,
        }
    }
}

impl RedisConfig {
    /// Effective TTL in seconds.
    pub fn ttl(&self) -> u64 {
        if self.ttl_secs <= 0 {
            DEFAULT_TTL_SECS
        } else {
            self.ttl_secs as u64
        }
    }

    /// Connection URL for the Redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

/// Device catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path of the SQLite catalog database
    pub db_path: PathBuf,
}

impl ModbusBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn from_json5(content: &str) -> Result<Self, ConfigError> {
        let config: ModbusBridgeConfig = rtucache_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between two cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let serial = &self.modbus;

        if serial.device.is_empty() {
            return Err(ConfigError::Validation(
                "modbus.device cannot be empty".to_string(),
            ));
        }

        if serial.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "modbus.baud_rate must be positive".to_string(),
            ));
        }

        if serial.parity().is_none() {
            return Err(ConfigError::Validation(format!(
                "invalid parity '{}' (use none, even, or odd)",
                serial.parity
            )));
        }

        if !(5..=8).contains(&serial.data_bits) {
            return Err(ConfigError::Validation(format!(
                "modbus.data_bits must be 5-8, got {}",
                serial.data_bits
            )));
        }

        if !matches!(serial.stop_bits, 1 | 2) {
            return Err(ConfigError::Validation(format!(
                "modbus.stop_bits must be 1 or 2, got {}",
                serial.stop_bits
            )));
        }

        if self.redis.host.is_empty() {
            return Err(ConfigError::Validation(
                "redis.host cannot be empty".to_string(),
            ));
        }

        if self.redis.port == 0 {
            return Err(ConfigError::Validation(
                "redis.port must be 1-65535".to_string(),
            ));
        }

        if self.catalog.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "catalog.db_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
