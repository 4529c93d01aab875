//! Pending write reconciliation.
//!
//! External consumers request register writes by setting
//! `modbus:write:<slave>:<target>` to the value to write. Each cycle the
//! reconciler applies every pending request to the bus and records the outcome
//! under `modbus:result:<slave>:<target>`.
//!
//! Failures are counted per target in `modbus:failcount:<slave>:<target>`. A
//! failed request stays pending and is retried next cycle; on the third
//! consecutive failure the request, its counter and its result are all
//! removed. The counter follows the target, not the value: a new value written
//! to a target with failures pending inherits the existing count.
//!
//! Requests that never reach the bus are not counted. A value that does not
//! parse as a register value, like a symbolic target that does not resolve,
//! stays pending untouched. No retry limit ever clears it, so it is skipped
//! again every cycle until its key expires or is overwritten.

use crate::bus::RegisterBus;
use crate::cache::KeyValueCache;
use crate::catalog::{Catalog, CatalogError};
use rtucache_common::{WriteRequestKey, WriteTarget, parse_write_request_key, write_request_pattern};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Consecutive failures after which a write request is abandoned.
pub const MAX_WRITE_ATTEMPTS: i64 = 3;

/// Outcome recorded in the result key of a write target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// The device acknowledged the write.
    Ok,
    /// The write failed; this many consecutive attempts have failed so far.
    Attempt(i64),
    /// The write failed [`MAX_WRITE_ATTEMPTS`] times in a row.
    MaxRetries,
}

impl fmt::Display for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteResult::Ok => f.write_str("OK"),
            WriteResult::Attempt(n) => write!(f, "ERROR: Attempt {}", n),
            WriteResult::MaxRetries => f.write_str("ERROR: Max retries reached"),
        }
    }
}

/// Statistics from one reconcile cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Writes acknowledged by the device.
    pub applied: usize,
    /// Failed writes left pending for another attempt.
    pub retried: usize,
    /// Writes abandoned after the last allowed attempt.
    pub exhausted: usize,
    /// Requests left untouched (malformed, unresolved or unreadable).
    pub skipped: usize,
}

/// Parse a pending write value into a register value.
///
/// Accepts unsigned values up to 65535 and signed values down to -32768,
/// the latter written as their two's complement.
pub fn parse_register_value(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    raw.parse::<u16>()
        .ok()
        .or_else(|| raw.parse::<i16>().ok().map(|v| v as u16))
}

/// Apply every pending write request found in the cache, in key order.
pub async fn reconcile_writes<B, C>(
    catalog: &Catalog,
    bus: &mut B,
    cache: &C,
    ttl_secs: u64,
) -> ReconcileStats
where
    B: RegisterBus + ?Sized,
    C: KeyValueCache + ?Sized,
{
    let mut stats = ReconcileStats::default();

    let mut keys = match cache.keys(&write_request_pattern()).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Failed to scan for pending writes");
            return stats;
        }
    };
    keys.sort();

    for key in &keys {
        let Some(request) = parse_write_request_key(key) else {
            debug!(key = %key, "Ignoring malformed write request key");
            stats.skipped += 1;
            continue;
        };

        let Some(value) = pending_value(cache, key).await else {
            stats.skipped += 1;
            continue;
        };

        let address = match resolve_address(catalog, &request).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                debug!(key = %key, "Write target not resolvable, leaving request pending");
                stats.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Catalog lookup failed, leaving request pending");
                stats.skipped += 1;
                continue;
            }
        };

        bus.set_slave(request.slave_id);
        match bus.write_register(address, value).await {
            Ok(()) => {
                info!(
                    slave_id = request.slave_id,
                    address,
                    value,
                    target = %request.target,
                    "Register written"
                );
                record_success(cache, key, &request, ttl_secs).await;
                stats.applied += 1;
            }
            Err(e) => {
                warn!(key = %key, address, error = %e, "Register write failed");
                match record_failure(cache, key, &request, ttl_secs).await {
                    Some(WriteResult::MaxRetries) => stats.exhausted += 1,
                    Some(_) => stats.retried += 1,
                    None => stats.skipped += 1,
                }
            }
        }
    }

    stats
}

/// Read and parse the value of a pending request.
async fn pending_value<C>(cache: &C, key: &str) -> Option<u16>
where
    C: KeyValueCache + ?Sized,
{
    let raw = match cache.get(key).await {
        // Removed between the scan and the read.
        Ok(None) => return None,
        Ok(Some(raw)) => raw,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read pending write");
            return None;
        }
    };

    let value = parse_register_value(&raw);
    if value.is_none() {
        warn!(key = %key, value = %raw, "Pending write value is not a register value");
    }
    value
}

/// Resolve the register address of a write request.
///
/// Symbolic targets are looked up through the slave's device type.
async fn resolve_address(
    catalog: &Catalog,
    request: &WriteRequestKey<'_>,
) -> Result<Option<u16>, CatalogError> {
    match request.target {
        WriteTarget::Address(address) => Ok(Some(address)),
        WriteTarget::Parameter(name) => {
            let Some(device_type) = catalog.device_type_of(request.slave_id).await? else {
                return Ok(None);
            };
            catalog.parameter_address(device_type, name).await
        }
    }
}

async fn record_success<C>(cache: &C, key: &str, request: &WriteRequestKey<'_>, ttl_secs: u64)
where
    C: KeyValueCache + ?Sized,
{
    let result_key = request.result_key();
    let fail_key = request.failure_counter_key();

    set_result(cache, &result_key, WriteResult::Ok, ttl_secs).await;
    delete(cache, key).await;
    delete(cache, &fail_key).await;
}

/// Count a failed attempt and record the matching result.
///
/// Returns `None` when the failure could not be counted; the request is then
/// left exactly as it was.
async fn record_failure<C>(
    cache: &C,
    key: &str,
    request: &WriteRequestKey<'_>,
    ttl_secs: u64,
) -> Option<WriteResult>
where
    C: KeyValueCache + ?Sized,
{
    let result_key = request.result_key();
    let fail_key = request.failure_counter_key();

    let attempts = match cache.incr(&fail_key).await {
        Ok(attempts) => attempts,
        Err(e) => {
            warn!(key = %fail_key, error = %e, "Failed to count write failure");
            return None;
        }
    };

    if let Err(e) = cache.expire(&fail_key, ttl_secs).await {
        warn!(key = %fail_key, error = %e, "Failed to set failure counter expiry");
    }

    if attempts >= MAX_WRITE_ATTEMPTS {
        error!(
            key = %key,
            attempts,
            "Write abandoned after maximum retries"
        );
        set_result(cache, &result_key, WriteResult::MaxRetries, ttl_secs).await;
        delete(cache, key).await;
        delete(cache, &fail_key).await;
        delete(cache, &result_key).await;
        Some(WriteResult::MaxRetries)
    } else {
        let result = WriteResult::Attempt(attempts);
        set_result(cache, &result_key, result, ttl_secs).await;
        Some(result)
    }
}

async fn set_result<C>(cache: &C, result_key: &str, result: WriteResult, ttl_secs: u64)
where
    C: KeyValueCache + ?Sized,
{
    if let Err(e) = cache
        .set_ex(result_key, &result.to_string(), ttl_secs)
        .await
    {
        warn!(key = %result_key, error = %e, "Failed to record write result");
    }
}

async fn delete<C>(cache: &C, key: &str)
where
    C: KeyValueCache + ?Sized,
{
    if let Err(e) = cache.del(key).await {
        warn!(key = %key, error = %e, "Failed to delete key");
    }
}
