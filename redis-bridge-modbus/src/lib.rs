//! Bridge between Modbus RTU devices and a Redis cache.
//!
//! The bridge reads the device topology from a SQLite catalog, polls every
//! device's register blocks over the serial bus and publishes the values to
//! the cache with an expiry. It also applies write requests that consumers
//! deposit in the cache, retrying a failed write up to three times.
//!
//! # Keys
//!
//! ```text
//! modbus:<slave>:reg<offset>          sensed register value
//! modbus:<slave>:<parameter>          register address of a named parameter
//! modbus:write:<slave>:<target>       pending write (address or parameter)
//! modbus:result:<slave>:<target>      OK | ERROR: Attempt <n> | ERROR: Max retries reached
//! modbus:failcount:<slave>:<target>   consecutive write failures
//! ```
//!
//! Every key written by the bridge expires after the configured TTL.

pub mod bus;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod device;
pub mod memory_cache;
pub mod params;
pub mod poller;
pub mod reconciler;
pub mod redis_cache;
pub mod runner;
