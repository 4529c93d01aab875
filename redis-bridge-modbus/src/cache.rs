//! Key-value cache interface.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Value at '{0}' is not an integer")]
    NotAnInteger(String),
    #[error("Invalid key pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Operations the bridge needs from the cache store.
///
/// Implementations must make [`incr`](KeyValueCache::incr) atomic with respect
/// to other clients of the same store.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Set a key with an expiry in seconds (`SET key value EX ttl`).
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    /// Get the value of a key.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Increment an integer key, creating it at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Set the expiry of an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Check whether a TCP listener accepts connections at `host:port`.
pub async fn probe_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "Cache probe refused");
            false
        }
        Err(_) => {
            debug!(host, port, "Cache probe timed out");
            false
        }
    }
}
