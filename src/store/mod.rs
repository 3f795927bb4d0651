//! Key-value store capability for gating state
//!
//! The gateway's kill switch, regime label, idempotency markers and
//! cooldown timestamps all live behind this trait so the gate logic can be
//! exercised against the in-memory implementation and production backends
//! can be swapped in from the host process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Store access failure taxonomy
///
/// Gates never propagate these: a failed read or write fails closed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend rejected or dropped the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Bounded timeout elapsed before the backend answered
    #[error("store operation timed out")]
    Timeout,
}

/// Capability trait for TTL'd key-value state
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key; None when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key with a time-to-live
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically write a key only if it is absent
    ///
    /// Returns true when this call created the entry. Concurrent callers
    /// racing on the same key see exactly one `true`.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;
}

/// In-memory store with lazy TTL expiry
///
/// Backs tests and single-process deployments. Expired entries are dropped
/// on access rather than swept.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("poisoned lock: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some((_, expires_at)) => *expires_at <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let live = entries
            .get(key)
            .map(|(_, expires_at)| *expires_at > now)
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }
}
