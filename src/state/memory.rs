//! In-process state backend used by default and in tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;

use super::{DEFAULT_KEY_PREFIX, StateError, StateStore, scoped_key, trace_prefix};

#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Map-backed [`StateStore`].
///
/// Entries with a time-to-live are dropped lazily: expired entries are
/// skipped on read and swept on the next write. Keys are built exactly like
/// the Redis backend builds them, so switching backends does not change
/// observable behavior.
#[derive(Debug)]
pub struct MemoryStateStore {
    entries: Mutex<FxHashMap<String, MemoryEntry>>,
    key_prefix: String,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            key_prefix: key_prefix.into(),
        }
    }

    /// Number of live entries across all traces, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, trace_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        let full_key = scoped_key(&self.key_prefix, trace_id, key);
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(&full_key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(&full_key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        trace_id: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let full_key = scoped_key(&self.key_prefix, trace_id, key);
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(full_key, MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, trace_id: &str, key: &str) -> Result<(), StateError> {
        let full_key = scoped_key(&self.key_prefix, trace_id, key);
        self.entries.lock().remove(&full_key);
        Ok(())
    }

    async fn clear(&self, trace_id: &str) -> Result<(), StateError> {
        let prefix = trace_prefix(&self.key_prefix, trace_id);
        self.entries
            .lock()
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), StateError> {
        self.entries.lock().clear();
        Ok(())
    }
}
