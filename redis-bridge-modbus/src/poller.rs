//! Register polling and sensed-value publishing.

use crate::bus::{BusError, RegisterBus};
use crate::cache::KeyValueCache;
use crate::device::{Device, RegisterBlock};
use rtucache_common::sensed_value_key;
use tracing::{debug, warn};

/// Statistics from one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    /// Blocks read in full.
    pub blocks_ok: usize,
    /// Blocks whose read failed on the bus.
    pub blocks_failed: usize,
    /// Blocks rejected before reaching the bus.
    pub blocks_rejected: usize,
    /// Register values written to the cache.
    pub values_published: usize,
    /// Register values the cache refused.
    pub publish_failures: usize,
}

/// Read one register block from the currently selected slave.
///
/// The block's count must lie in `1..=64`; otherwise the read is rejected
/// without touching the bus. The read succeeds only when the bus returns
/// exactly `count` registers.
pub async fn read_block<B>(bus: &mut B, block: &RegisterBlock) -> Result<Vec<u16>, BusError>
where
    B: RegisterBus + ?Sized,
{
    let count = block
        .request_size()
        .ok_or(BusError::InvalidCount(block.count))?;

    let values = bus
        .read_registers(block.function, block.address, count)
        .await?;

    if values.len() != usize::from(count) {
        return Err(BusError::ShortRead {
            expected: usize::from(count),
            actual: values.len(),
        });
    }

    Ok(values)
}

/// Poll every device once and publish the values to the cache.
///
/// Each device's blocks are laid out back to back: a block's values occupy
/// offsets `[offset, offset + count)` and the next block starts at
/// `offset + count`. Only blocks read in full take offsets, so when a block
/// fails the blocks after it shift down for that cycle. A failing block or
/// device never stops the others.
pub async fn poll_once<B, C>(devices: &[Device], bus: &mut B, cache: &C, ttl_secs: u64) -> PollStats
where
    B: RegisterBus + ?Sized,
    C: KeyValueCache + ?Sized,
{
    let mut stats = PollStats::default();

    for device in devices {
        bus.set_slave(device.slave_id);
        let mut offset = 0usize;

        for block in &device.blocks {
            match read_block(bus, block).await {
                Ok(values) => {
                    debug!(
                        slave_id = device.slave_id,
                        function = block.function.as_str(),
                        address = block.address,
                        count = values.len(),
                        "Block read"
                    );
                    stats.blocks_ok += 1;
                    publish_values(cache, device.slave_id, offset, &values, ttl_secs, &mut stats)
                        .await;
                    offset += values.len();
                }
                Err(e @ BusError::InvalidCount(_)) => {
                    warn!(
                        slave_id = device.slave_id,
                        address = block.address,
                        error = %e,
                        "Block rejected"
                    );
                    stats.blocks_rejected += 1;
                }
                Err(e) => {
                    warn!(
                        slave_id = device.slave_id,
                        device = %device.name,
                        function = block.function.as_str(),
                        address = block.address,
                        error = %e,
                        "Block read failed"
                    );
                    stats.blocks_failed += 1;
                }
            }
        }
    }

    stats
}

async fn publish_values<C>(
    cache: &C,
    slave_id: u8,
    offset: usize,
    values: &[u16],
    ttl_secs: u64,
    stats: &mut PollStats,
) where
    C: KeyValueCache + ?Sized,
{
    for (index, value) in values.iter().enumerate() {
        let key = sensed_value_key(slave_id, offset + index);
        match cache.set_ex(&key, &value.to_string(), ttl_secs).await {
            Ok(()) => stats.values_published += 1,
            Err(e) => {
                stats.publish_failures += 1;
                warn!(key = %key, error = %e, "Failed to publish register value");
            }
        }
    }
}
