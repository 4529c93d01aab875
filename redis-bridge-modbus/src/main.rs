//! Bridge between Modbus RTU devices and a Redis cache.
//!
//! Polls the devices listed in the SQLite catalog and publishes their
//! register values to Redis, applying write requests found in Redis.

use anyhow::{Context, Result};
use redis_bridge_modbus::config::ModbusBridgeConfig;
use redis_bridge_modbus::runner;
use rtucache_common::BridgeArgs;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("modbus-redis.json5");

    let config = ModbusBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config
        .logging
        .with_level_override(args.log_level.as_deref());
    rtucache_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting redis-bridge-modbus");
    info!("Loaded configuration from {:?}", args.config);

    let mut bridge = runner::start(&config)
        .await
        .context("Bridge startup failed")?;

    bridge.run(config.poll_interval(), args.once).await;

    info!("Modbus bridge stopped");

    Ok(())
}
