//! Read-only access to the SQLite device catalog.
//!
//! The catalog describes the device topology with three tables:
//!
//! ```text
//! iotdevices(slaveid, devicename, devices_type_id)
//! iot_devices_types(devices_type_id, register_list)
//! sensor_data_register_mapping(devices_type_id, parameter_name, register_address)
//! ```

use crate::device::{Device, MAX_DEVICES, parse_register_list};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info, warn};

/// Error type for catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog database not found: {0}")]
    NotFound(String),
    #[error("Failed to open catalog '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Catalog query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Identifier of a device type in the catalog.
pub type DeviceTypeId = i64;

/// A parameter name and the register it lives at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMapping {
    pub name: String,
    pub address: u16,
}

/// A device's slave id and its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeAssignment {
    pub slave_id: u8,
    pub device_type: DeviceTypeId,
}

/// Handle to the device catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open the catalog database read-only.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db_path = db_path.as_ref();
        let path = db_path.display().to_string();

        if !db_path.exists() {
            return Err(CatalogError::NotFound(path));
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| CatalogError::Open {
                path: path.clone(),
                source,
            })?;

        info!(path = %path, "Opened device catalog");

        Ok(Self { pool })
    }

    /// Create a catalog from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load every device together with its type's register blocks.
    ///
    /// Devices whose register list cannot be parsed, or whose row cannot be
    /// decoded, are skipped. At most [`MAX_DEVICES`] devices are returned.
    pub async fn load_devices(&self) -> Result<Vec<Device>, CatalogError> {
        let rows = sqlx::query(
            "SELECT d.slaveid, d.devicename, t.register_list \
             FROM iotdevices d \
             JOIN iot_devices_types t ON d.devices_type_id = t.devices_type_id \
             ORDER BY d.rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut devices = Vec::new();

        for row in rows {
            if devices.len() >= MAX_DEVICES {
                debug!(max = MAX_DEVICES, "Device limit reached, ignoring the rest");
                break;
            }

            let Some(slave_id) = slave_id_column(&row) else {
                continue;
            };

            let name: Option<String> = row.try_get("devicename").unwrap_or_default();
            let register_list: Option<String> = row.try_get("register_list").unwrap_or_default();

            let Some(register_list) = register_list else {
                warn!(slave_id, "Device type has no register list, skipping device");
                continue;
            };

            match parse_register_list(&register_list) {
                Ok(blocks) => devices.push(Device {
                    slave_id,
                    name: name.unwrap_or_default(),
                    blocks,
                }),
                Err(e) => {
                    warn!(slave_id, error = %e, "Invalid register list, skipping device");
                }
            }
        }

        info!(count = devices.len(), "Loaded devices from catalog");

        Ok(devices)
    }

    /// List every device's slave id and type.
    pub async fn device_type_assignments(&self) -> Result<Vec<TypeAssignment>, CatalogError> {
        let rows = sqlx::query("SELECT slaveid, devices_type_id FROM iotdevices ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let slave_id = slave_id_column(row)?;
                let device_type = row.try_get("devices_type_id").ok()?;
                Some(TypeAssignment {
                    slave_id,
                    device_type,
                })
            })
            .collect())
    }

    /// Resolve the type of the device with the given slave id.
    pub async fn device_type_of(&self, slave_id: u8) -> Result<Option<DeviceTypeId>, CatalogError> {
        let row = sqlx::query("SELECT devices_type_id FROM iotdevices WHERE slaveid = ? LIMIT 1")
            .bind(i64::from(slave_id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| row.try_get::<Option<i64>, _>("devices_type_id").ok().flatten()))
    }

    /// All parameter mappings of a device type.
    ///
    /// Rows with a missing name or an address outside the register range are
    /// left out.
    pub async fn parameter_map(
        &self,
        device_type: DeviceTypeId,
    ) -> Result<Vec<ParameterMapping>, CatalogError> {
        let rows = sqlx::query(
            "SELECT parameter_name, register_address FROM sensor_data_register_mapping \
             WHERE devices_type_id = ? ORDER BY rowid",
        )
        .bind(device_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.try_get::<Option<String>, _>("parameter_name").ok()??;
                let address = register_address_column(row)?;
                Some(ParameterMapping { name, address })
            })
            .collect())
    }

    /// Resolve a parameter name to a register address for a device type.
    pub async fn parameter_address(
        &self,
        device_type: DeviceTypeId,
        parameter: &str,
    ) -> Result<Option<u16>, CatalogError> {
        let row = sqlx::query(
            "SELECT register_address FROM sensor_data_register_mapping \
             WHERE devices_type_id = ? AND parameter_name = ? LIMIT 1",
        )
        .bind(device_type)
        .bind(parameter)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(register_address_column))
    }
}

fn slave_id_column(row: &sqlx::sqlite::SqliteRow) -> Option<u8> {
    let raw: i64 = match row.try_get("slaveid") {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Unreadable slave id in catalog row");
            return None;
        }
    };

    match u8::try_from(raw) {
        Ok(slave_id) => Some(slave_id),
        Err(_) => {
            warn!(slave_id = raw, "Slave id out of range, skipping device");
            None
        }
    }
}

fn register_address_column(row: &sqlx::sqlite::SqliteRow) -> Option<u16> {
    let raw: i64 = row.try_get::<Option<i64>, _>("register_address").ok()??;
    u16::try_from(raw).ok()
}
