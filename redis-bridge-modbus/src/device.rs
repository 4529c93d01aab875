//! In-memory device model loaded from the catalog.

use serde_json::Value;
use thiserror::Error;

/// Maximum number of devices loaded from the catalog.
pub const MAX_DEVICES: usize = 128;

/// Maximum number of register blocks kept per device.
pub const MAX_BLOCKS: usize = 64;

/// Largest number of registers read in a single request.
pub const MAX_BLOCK_SIZE: u16 = 64;

/// Modbus read function used for a register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFunction {
    /// Function code 3.
    HoldingRegisters,
    /// Function code 4.
    InputRegisters,
}

impl ReadFunction {
    /// Map a Modbus function code to a read function.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            3 => Some(ReadFunction::HoldingRegisters),
            4 => Some(ReadFunction::InputRegisters),
            _ => None,
        }
    }

    /// The Modbus function code.
    pub fn code(&self) -> u8 {
        match self {
            ReadFunction::HoldingRegisters => 3,
            ReadFunction::InputRegisters => 4,
        }
    }

    /// Return the string name for this function.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFunction::HoldingRegisters => "holding",
            ReadFunction::InputRegisters => "input",
        }
    }
}

/// A contiguous range of registers read in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub function: ReadFunction,
    pub address: u16,
    /// Requested register count, as stored in the catalog.
    ///
    /// Kept unvalidated so that an out-of-range count is rejected at read
    /// time instead of silently changing the device layout.
    pub count: i64,
}

impl RegisterBlock {
    /// The count as a request size, if it lies in `1..=MAX_BLOCK_SIZE`.
    pub fn request_size(&self) -> Option<u16> {
        u16::try_from(self.count)
            .ok()
            .filter(|count| (1..=MAX_BLOCK_SIZE).contains(count))
    }
}

/// A Modbus slave and the register blocks polled from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub slave_id: u8,
    pub name: String,
    pub blocks: Vec<RegisterBlock>,
}

/// Error parsing a register list definition.
#[derive(Debug, Error)]
pub enum RegisterListError {
    #[error("register list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("register list is not a JSON array")]
    NotAnArray,
}

/// Parse a register list definition.
///
/// The definition is a JSON array of `{function, address, count}` objects.
/// Entries with a missing or non-numeric field, an unsupported function code
/// or an address outside the register range are discarded. At most
/// [`MAX_BLOCKS`] entries are kept.
pub fn parse_register_list(json: &str) -> Result<Vec<RegisterBlock>, RegisterListError> {
    let root: Value = serde_json::from_str(json)?;
    let items = root.as_array().ok_or(RegisterListError::NotAnArray)?;

    Ok(items
        .iter()
        .filter_map(parse_block)
        .take(MAX_BLOCKS)
        .collect())
}

fn parse_block(item: &Value) -> Option<RegisterBlock> {
    let function = ReadFunction::from_code(numeric_field(item, "function")?)?;
    let address = u16::try_from(numeric_field(item, "address")?).ok()?;
    let count = numeric_field(item, "count")?;

    Some(RegisterBlock {
        function,
        address,
        count,
    })
}

/// Read a numeric field, truncating fractional values.
fn numeric_field(item: &Value, name: &str) -> Option<i64> {
    let value = item.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v.trunc() as i64))
}
