//! rtucache Common Library
//!
//! This crate provides shared types and utilities for rtucache bridges:
//!
//! - [`keyspace`] - Cache key builders and parsers
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`args`] - Command-line arguments shared by every bridge binary
//! - [`error`] - Error types

pub mod args;
pub mod config;
pub mod error;
pub mod keyspace;

// Re-export commonly used types at the crate root
pub use args::BridgeArgs;
pub use config::{LogFormat, LoggingConfig, parse_config};
pub use error::{Error, Result};
pub use keyspace::{
    KEY_PREFIX, WriteRequestKey, WriteTarget, failure_counter_key, parameter_key,
    parse_write_request_key, result_key, sensed_value_key, write_request_key,
    write_request_pattern,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use rtucache_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
