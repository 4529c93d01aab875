//! Cache key builders and parsers.
//!
//! Every key the bridge reads or writes lives under the `modbus:` prefix:
//!
//! ```text
//! modbus:<slave>:reg<offset>            latest polled register value
//! modbus:<slave>:<param>                parameter name -> register address
//! modbus:write:<slave>:<target>         pending write request
//! modbus:result:<slave>:<target>        outcome of the last write attempt
//! modbus:failcount:<slave>:<target>     consecutive write failures
//! ```
//!
//! `<target>` is either a numeric register address or a parameter name.

use std::fmt;

/// Prefix shared by every key in the key-space.
pub const KEY_PREFIX: &str = "modbus";

const WRITE_SEGMENT: &str = "write";
const RESULT_SEGMENT: &str = "result";
const FAILCOUNT_SEGMENT: &str = "failcount";

/// The register a write request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget<'a> {
    /// A raw register address.
    Address(u16),
    /// A parameter name resolved through the device type's mapping table.
    Parameter(&'a str),
}

impl WriteTarget<'_> {
    /// Classify a raw target segment.
    ///
    /// A segment made only of ASCII digits that fits a register address is
    /// numeric; anything else is treated as a parameter name.
    pub fn parse(segment: &str) -> Option<WriteTarget<'_>> {
        if segment.is_empty() {
            return None;
        }

        if segment.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(address) = segment.parse::<u16>() {
                return Some(WriteTarget::Address(address));
            }
        }

        Some(WriteTarget::Parameter(segment))
    }
}

impl fmt::Display for WriteTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Address(address) => write!(f, "{}", address),
            WriteTarget::Parameter(name) => f.write_str(name),
        }
    }
}

/// Key holding the latest value polled for a register offset.
///
/// # Example
/// ```
/// use rtucache_common::keyspace::sensed_value_key;
///
/// assert_eq!(sensed_value_key(7, 3), "modbus:7:reg3");
/// ```
pub fn sensed_value_key(slave_id: u8, offset: usize) -> String {
    format!("{}:{}:reg{}", KEY_PREFIX, slave_id, offset)
}

/// Key mapping a parameter name to its register address.
///
/// # Example
/// ```
/// use rtucache_common::keyspace::parameter_key;
///
/// assert_eq!(parameter_key(7, "level_in_mm"), "modbus:7:level_in_mm");
/// ```
pub fn parameter_key(slave_id: u8, parameter: &str) -> String {
    format!("{}:{}:{}", KEY_PREFIX, slave_id, parameter)
}

/// Key of a pending write request.
pub fn write_request_key(slave_id: u8, target: WriteTarget<'_>) -> String {
    format!("{}:{}:{}:{}", KEY_PREFIX, WRITE_SEGMENT, slave_id, target)
}

/// Key recording the outcome of the last write attempt on a target.
///
/// # Example
/// ```
/// use rtucache_common::keyspace::{result_key, WriteTarget};
///
/// assert_eq!(result_key(7, WriteTarget::Address(4)), "modbus:result:7:4");
/// ```
pub fn result_key(slave_id: u8, target: WriteTarget<'_>) -> String {
    format!("{}:{}:{}:{}", KEY_PREFIX, RESULT_SEGMENT, slave_id, target)
}

/// Key counting consecutive write failures on a target.
pub fn failure_counter_key(slave_id: u8, target: WriteTarget<'_>) -> String {
    format!("{}:{}:{}:{}", KEY_PREFIX, FAILCOUNT_SEGMENT, slave_id, target)
}

/// Glob pattern matching every pending write request.
///
/// # Example
/// ```
/// use rtucache_common::keyspace::write_request_pattern;
///
/// assert_eq!(write_request_pattern(), "modbus:write:*");
/// ```
pub fn write_request_pattern() -> String {
    format!("{}:{}:*", KEY_PREFIX, WRITE_SEGMENT)
}

/// Parse a pending write request key.
///
/// Returns `None` unless the key has exactly the shape
/// `modbus:write:<slave>:<target>` with a valid slave id and a non-empty target.
pub fn parse_write_request_key(key: &str) -> Option<WriteRequestKey<'_>> {
    let parts: Vec<&str> = key.split(':').collect();

    if parts.len() != 4 || parts[0] != KEY_PREFIX || parts[1] != WRITE_SEGMENT {
        return None;
    }

    let slave_id = parts[2].parse::<u8>().ok()?;
    let target = WriteTarget::parse(parts[3])?;

    Some(WriteRequestKey { slave_id, target })
}

/// Parsed components of a pending write request key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequestKey<'a> {
    pub slave_id: u8,
    pub target: WriteTarget<'a>,
}

impl WriteRequestKey<'_> {
    /// Key recording the outcome for this request's target.
    pub fn result_key(&self) -> String {
        result_key(self.slave_id, self.target)
    }

    /// Key counting failures for this request's target.
    pub fn failure_counter_key(&self) -> String {
        failure_counter_key(self.slave_id, self.target)
    }
}
