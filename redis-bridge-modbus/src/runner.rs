//! Bridge lifecycle.
//!
//! Startup walks a fixed sequence of states; any failure before the cycle
//! loop is fatal. Once running, the bridge alternates a poll cycle and a
//! reconcile cycle with a sleep in between, and failures inside a cycle only
//! affect the entity that failed.
//!
//! ```text
//! WaitForCache -> LoadCatalog -> PublishMap -> ConnectBus -> LoadDevices
//!     -> PollCycle <-> ReconcileCycle
//! ```

use crate::bus::{BusError, RegisterBus, RtuBus};
use crate::cache::{CacheError, KeyValueCache, probe_reachable};
use crate::catalog::{Catalog, CatalogError};
use crate::config::ModbusBridgeConfig;
use crate::device::Device;
use crate::params::publish_parameter_map;
use crate::poller::{PollStats, poll_once};
use crate::reconciler::{ReconcileStats, reconcile_writes};
use crate::redis_cache::RedisCache;
use std::fmt;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info};

/// Fatal bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Cache at {host}:{port} unreachable after {attempts} attempts")]
    CacheUnavailable {
        host: String,
        port: u16,
        attempts: u32,
    },
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Lifecycle states of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    WaitForCache,
    LoadCatalog,
    PublishMap,
    ConnectBus,
    LoadDevices,
    PollCycle,
    ReconcileCycle,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::WaitForCache => "wait_for_cache",
            BridgeState::LoadCatalog => "load_catalog",
            BridgeState::PublishMap => "publish_map",
            BridgeState::ConnectBus => "connect_bus",
            BridgeState::LoadDevices => "load_devices",
            BridgeState::PollCycle => "poll_cycle",
            BridgeState::ReconcileCycle => "reconcile_cycle",
        };
        f.write_str(name)
    }
}

fn enter(state: BridgeState) {
    debug!(state = %state, "Entering state");
}

/// Block until the cache accepts TCP connections.
///
/// Probes every `interval`. With `attempts` set, gives up after that many
/// failed probes; otherwise waits forever.
pub async fn wait_for_cache(
    host: &str,
    port: u16,
    interval: Duration,
    probe_timeout: Duration,
    attempts: Option<u32>,
) -> Result<(), BridgeError> {
    let mut tried = 0u32;

    loop {
        if probe_reachable(host, port, probe_timeout).await {
            info!(host, port, "Cache is reachable");
            return Ok(());
        }

        tried += 1;
        if attempts.is_some_and(|max| tried >= max) {
            return Err(BridgeError::CacheUnavailable {
                host: host.to_string(),
                port,
                attempts: tried,
            });
        }

        info!(
            host,
            port,
            retry_in_secs = interval.as_secs(),
            "Cache not reachable yet, waiting"
        );
        tokio::time::sleep(interval).await;
    }
}

/// Run the startup sequence against the real cache, catalog and bus.
pub async fn start(config: &ModbusBridgeConfig) -> Result<Bridge<RtuBus, RedisCache>, BridgeError> {
    let redis = &config.redis;
    let ttl_secs = redis.ttl();

    enter(BridgeState::WaitForCache);
    wait_for_cache(
        &redis.host,
        redis.port,
        Duration::from_secs(redis.probe_interval_secs),
        Duration::from_millis(redis.probe_timeout_ms),
        redis.probe_attempts,
    )
    .await?;
    let cache = RedisCache::connect(&redis.url()).await?;

    enter(BridgeState::LoadCatalog);
    let catalog = Catalog::open(&config.catalog.db_path).await?;

    enter(BridgeState::PublishMap);
    publish_parameter_map(&catalog, &cache, ttl_secs).await;

    enter(BridgeState::ConnectBus);
    let bus = RtuBus::open(&config.modbus)?;

    enter(BridgeState::LoadDevices);
    let devices = catalog.load_devices().await?;

    Ok(Bridge::new(catalog, bus, cache, devices, ttl_secs))
}

/// Outcome of one poll + reconcile cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub poll: PollStats,
    pub reconcile: ReconcileStats,
}

/// A started bridge: the device list plus exclusive handles on the bus and
/// cache.
pub struct Bridge<B, C> {
    catalog: Catalog,
    bus: B,
    cache: C,
    devices: Vec<Device>,
    ttl_secs: u64,
}

impl<B, C> Bridge<B, C>
where
    B: RegisterBus,
    C: KeyValueCache,
{
    /// Assemble a bridge from already-initialized parts.
    pub fn new(catalog: Catalog, bus: B, cache: C, devices: Vec<Device>, ttl_secs: u64) -> Self {
        Self {
            catalog,
            bus,
            cache,
            devices,
            ttl_secs,
        }
    }

    /// The devices being polled.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The cache backend.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The bus backend.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// TTL applied to every key the bridge writes.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Run one poll cycle followed by one reconcile cycle.
    pub async fn run_cycle(&mut self) -> CycleStats {
        enter(BridgeState::PollCycle);
        let poll = poll_once(&self.devices, &mut self.bus, &self.cache, self.ttl_secs).await;
        debug!(
            blocks_ok = poll.blocks_ok,
            blocks_failed = poll.blocks_failed,
            blocks_rejected = poll.blocks_rejected,
            values_published = poll.values_published,
            publish_failures = poll.publish_failures,
            "Poll cycle complete"
        );

        enter(BridgeState::ReconcileCycle);
        let reconcile =
            reconcile_writes(&self.catalog, &mut self.bus, &self.cache, self.ttl_secs).await;
        debug!(
            applied = reconcile.applied,
            retried = reconcile.retried,
            exhausted = reconcile.exhausted,
            skipped = reconcile.skipped,
            "Reconcile cycle complete"
        );

        CycleStats { poll, reconcile }
    }

    /// Run cycles until Ctrl+C, sleeping `interval` between them.
    ///
    /// With `once`, a single cycle runs and the call returns.
    pub async fn run(&mut self, interval: Duration, once: bool) {
        info!(
            devices = self.devices.len(),
            interval_secs = interval.as_secs(),
            ttl_secs = self.ttl_secs,
            "Bridge running"
        );

        loop {
            self.run_cycle().await;

            if once {
                info!("Single cycle complete");
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received shutdown signal"),
                        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                    }
                    return;
                }
            }
        }
    }
}
