//! Field-bus access.
//!
//! The serial line is half-duplex: a request must complete before the next
//! one is sent. Every [`RegisterBus`] operation takes `&mut self`, so the
//! single owner of the bus handle serializes all requests.

use crate::config::{Parity, SerialConfig};
use crate::device::ReadFunction;
use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::info;

/// Error type for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial open failed: {0}")]
    Open(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Expected {expected} registers, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Invalid register count {0} (must be 1-64)")]
    InvalidCount(i64),
}

/// Register-level access to the devices on one bus.
#[async_trait]
pub trait RegisterBus: Send {
    /// Select the slave addressed by subsequent requests.
    fn set_slave(&mut self, slave_id: u8);

    /// Read `count` registers starting at `address`.
    async fn read_registers(
        &mut self,
        function: ReadFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, BusError>;

    /// Write a single holding register.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError>;
}

/// Modbus RTU bus on a serial port.
pub struct RtuBus {
    ctx: Context,
    timeout: Duration,
}

impl RtuBus {
    /// Open the serial port described by the configuration.
    pub fn open(config: &SerialConfig) -> Result<Self, BusError> {
        let parity = match config.parity() {
            Some(Parity::Even) => tokio_serial::Parity::Even,
            Some(Parity::Odd) => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&config.device, config.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| BusError::Open(format!("{}: {}", config.device, e)))?;

        info!(
            device = %config.device,
            baud_rate = config.baud_rate,
            parity = %config.parity,
            "Opened Modbus RTU bus"
        );

        Ok(Self {
            ctx: rtu::attach(serial),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl RegisterBus for RtuBus {
    fn set_slave(&mut self, slave_id: u8) {
        self.ctx.set_slave(Slave(slave_id));
    }

    async fn read_registers(
        &mut self,
        function: ReadFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, BusError> {
        let timeout = self.timeout;
        let ctx = &mut self.ctx;
        let request = async move {
            match function {
                ReadFunction::HoldingRegisters => ctx.read_holding_registers(address, count).await,
                ReadFunction::InputRegisters => ctx.read_input_registers(address, count).await,
            }
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| BusError::Timeout(timeout))?
            .map_err(|e| BusError::Transport(e.to_string()))?
            .map_err(|e| BusError::Exception(format!("{:?}", e)))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.ctx.write_single_register(address, value))
            .await
            .map_err(|_| BusError::Timeout(timeout))?
            .map_err(|e| BusError::Transport(e.to_string()))?
            .map_err(|e| BusError::Exception(format!("{:?}", e)))
    }
}
