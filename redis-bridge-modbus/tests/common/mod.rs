//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use redis_bridge_modbus::bus::{BusError, RegisterBus};
use redis_bridge_modbus::catalog::Catalog;
use redis_bridge_modbus::device::ReadFunction;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// A request seen by [`FakeBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read {
        slave_id: u8,
        function: ReadFunction,
        address: u16,
        count: u16,
    },
    Write {
        slave_id: u8,
        address: u16,
        value: u16,
    },
}

/// Scripted register bus.
///
/// Reads are served from a per-slave register image; a read touching an
/// unset register fails with an exception. Write outcomes are consumed from
/// a queue and succeed once the queue is empty.
#[derive(Debug, Default)]
pub struct FakeBus {
    slave_id: u8,
    registers: HashMap<(u8, u16), u16>,
    failing_reads: HashSet<(u8, u16)>,
    short_reads: HashSet<(u8, u16)>,
    write_outcomes: VecDeque<bool>,
    pub calls: Vec<Call>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set consecutive registers of a slave starting at `address`.
    pub fn with_registers(mut self, slave_id: u8, address: u16, values: &[u16]) -> Self {
        for (i, value) in values.iter().enumerate() {
            self.registers.insert((slave_id, address + i as u16), *value);
        }
        self
    }

    /// Make reads starting at `address` time out.
    pub fn failing_read(mut self, slave_id: u8, address: u16) -> Self {
        self.failing_reads.insert((slave_id, address));
        self
    }

    /// Make reads starting at `address` return one register too few.
    pub fn short_read(mut self, slave_id: u8, address: u16) -> Self {
        self.short_reads.insert((slave_id, address));
        self
    }

    /// Queue the outcomes of the next writes, `true` meaning success.
    pub fn script_writes(&mut self, outcomes: &[bool]) {
        self.write_outcomes.extend(outcomes.iter().copied());
    }

    pub fn register(&self, slave_id: u8, address: u16) -> Option<u16> {
        self.registers.get(&(slave_id, address)).copied()
    }

    pub fn reads(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Read { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Write { .. }))
            .count()
    }
}

#[async_trait]
impl RegisterBus for FakeBus {
    fn set_slave(&mut self, slave_id: u8) {
        self.slave_id = slave_id;
    }

    async fn read_registers(
        &mut self,
        function: ReadFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, BusError> {
        let slave_id = self.slave_id;
        self.calls.push(Call::Read {
            slave_id,
            function,
            address,
            count,
        });

        if self.failing_reads.contains(&(slave_id, address)) {
            return Err(BusError::Timeout(Duration::from_millis(1000)));
        }

        let mut values = (0..count)
            .map(|i| self.registers.get(&(slave_id, address + i)).copied())
            .collect::<Option<Vec<u16>>>()
            .ok_or_else(|| BusError::Exception("IllegalDataAddress".to_string()))?;

        if self.short_reads.contains(&(slave_id, address)) {
            values.pop();
        }

        Ok(values)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        let slave_id = self.slave_id;
        self.calls.push(Call::Write {
            slave_id,
            address,
            value,
        });

        if self.write_outcomes.pop_front().unwrap_or(true) {
            self.registers.insert((slave_id, address), value);
            Ok(())
        } else {
            Err(BusError::Timeout(Duration::from_millis(1000)))
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE iot_devices_types (devices_type_id INTEGER PRIMARY KEY, register_list TEXT)",
    "CREATE TABLE iotdevices (slaveid INTEGER, devicename TEXT, devices_type_id INTEGER)",
    "CREATE TABLE sensor_data_register_mapping \
     (devices_type_id INTEGER, parameter_name TEXT, register_address INTEGER)",
];

/// Create an empty in-memory catalog.
pub async fn memory_catalog() -> Catalog {
    // A single connection that never recycles keeps the in-memory database
    // alive for the whole test.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }

    Catalog::from_pool(pool)
}

pub async fn add_type(pool: &SqlitePool, type_id: i64, register_list: Option<&str>) {
    sqlx::query("INSERT INTO iot_devices_types (devices_type_id, register_list) VALUES (?, ?)")
        .bind(type_id)
        .bind(register_list)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn add_device(pool: &SqlitePool, slave_id: i64, name: &str, type_id: i64) {
    sqlx::query("INSERT INTO iotdevices (slaveid, devicename, devices_type_id) VALUES (?, ?, ?)")
        .bind(slave_id)
        .bind(name)
        .bind(type_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn add_mapping(pool: &SqlitePool, type_id: i64, parameter: &str, address: i64) {
    sqlx::query(
        "INSERT INTO sensor_data_register_mapping \
         (devices_type_id, parameter_name, register_address) VALUES (?, ?, ?)",
    )
    .bind(type_id)
    .bind(parameter)
    .bind(address)
    .execute(pool)
    .await
    .unwrap();
}
