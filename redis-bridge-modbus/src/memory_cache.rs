//! In-process cache backend.
//!
//! Behaves like the subset of Redis the bridge relies on, including key
//! expiry. Used by the test suite and for commissioning without a cache
//! service.

use crate::cache::{CacheError, KeyValueCache};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl_secs: Option<u64>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-memory implementation of [`KeyValueCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key without expiry, the way an external producer would.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(
            key.into(),
            Entry {
                value: value.into(),
                ttl_secs: None,
                expires_at: None,
            },
        );
    }

    /// Current value of a key, if it is live.
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// The expiry last set on a key, if any.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.ttl_secs)
    }

    /// Whether a live key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// All live keys and values, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the cache holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, entry| entry.is_live(now));
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl_secs: Some(ttl_secs),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.value(key))
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, Instant::now());
        Ok(entries.remove(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, Instant::now());

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            ttl_secs: None,
            expires_at: None,
        });

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
        let next = current + 1;
        entry.value = next.to_string();

        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, Instant::now());

        match entries.get_mut(key) {
            Some(entry) => {
                entry.ttl_secs = Some(ttl_secs);
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let glob = glob::Pattern::new(pattern).map_err(|source| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
