//! Startup publication of the symbolic parameter map.
//!
//! For every device, each parameter of its type is published as
//! `modbus:<slave>:<parameter> = <address>` so that consumers can address
//! registers by name. The map is published once and expires with the
//! configured TTL.

use crate::cache::KeyValueCache;
use crate::catalog::Catalog;
use rtucache_common::parameter_key;
use tracing::{debug, info, warn};

/// Statistics from publishing the parameter map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParamStats {
    /// Devices whose mappings were published.
    pub devices: usize,
    /// Devices skipped because their type's mappings could not be queried.
    pub devices_skipped: usize,
    /// Parameter keys written.
    pub parameters: usize,
    /// Parameter keys the cache refused.
    pub publish_failures: usize,
}

/// Publish every device's parameter-name to register-address mappings.
///
/// Never fails: when the device list cannot be queried nothing is published,
/// and a failing per-type lookup skips that device.
pub async fn publish_parameter_map<C>(catalog: &Catalog, cache: &C, ttl_secs: u64) -> ParamStats
where
    C: KeyValueCache + ?Sized,
{
    let mut stats = ParamStats::default();

    let assignments = match catalog.device_type_assignments().await {
        Ok(assignments) => assignments,
        Err(e) => {
            warn!(error = %e, "Failed to list devices, parameter map not published");
            return stats;
        }
    };

    for assignment in assignments {
        let mappings = match catalog.parameter_map(assignment.device_type).await {
            Ok(mappings) => mappings,
            Err(e) => {
                warn!(
                    slave_id = assignment.slave_id,
                    device_type = assignment.device_type,
                    error = %e,
                    "Failed to query parameter map, skipping device"
                );
                stats.devices_skipped += 1;
                continue;
            }
        };

        for mapping in &mappings {
            let key = parameter_key(assignment.slave_id, &mapping.name);
            match cache
                .set_ex(&key, &mapping.address.to_string(), ttl_secs)
                .await
            {
                Ok(()) => stats.parameters += 1,
                Err(e) => {
                    stats.publish_failures += 1;
                    warn!(key = %key, error = %e, "Failed to publish parameter mapping");
                }
            }
        }

        debug!(
            slave_id = assignment.slave_id,
            parameters = mappings.len(),
            "Published parameter map"
        );
        stats.devices += 1;
    }

    info!(
        devices = stats.devices,
        parameters = stats.parameters,
        "Parameter map published"
    );

    stats
}
