//! Redis-backed state for runtimes spanning multiple processes.
//!
//! Values are stored as JSON strings under `{prefix}{trace_id}:{key}`, with
//! time-to-live delegated to Redis key expiry. Connections go through a
//! [`ConnectionManager`], which transparently reconnects after transient
//! network failures.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{StateError, StateStore, scoped_key, trace_prefix};

/// [`StateStore`] backend on a shared Redis instance.
pub struct RedisStateStore {
    conn: Mutex<Option<ConnectionManager>>,
    key_prefix: String,
}

impl RedisStateStore {
    /// Connects to Redis and verifies the server is reachable.
    #[instrument(skip(url, key_prefix), err)]
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StateError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        debug!("redis state store connected");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            key_prefix: key_prefix.into(),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, StateError> {
        self.conn.lock().clone().ok_or(StateError::Closed)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, trace_id: &str, key: &str) -> Result<Option<Value>, StateError> {
        let full_key = scoped_key(&self.key_prefix, trace_id, key);
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(&full_key).await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
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
        let payload = serde_json::to_string(&value)?;
        let mut conn = self.connection()?;
        match ttl {
            Some(ttl) => {
                // Redis expiry has whole-second resolution; round up so a
                // sub-second ttl does not become "no expiry at all".
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(&full_key, payload, secs).await?;
            }
            None => {
                let _: () = conn.set(&full_key, payload).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, trace_id: &str, key: &str) -> Result<(), StateError> {
        let full_key = scoped_key(&self.key_prefix, trace_id, key);
        let mut conn = self.connection()?;
        let _: () = conn.del(&full_key).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn clear(&self, trace_id: &str) -> Result<(), StateError> {
        let pattern = format!("{}*", trace_prefix(&self.key_prefix, trace_id));
        let keys: Vec<String> = {
            let mut scan_conn = self.connection()?;
            let mut iter = scan_conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(());
        }
        debug!(trace = %trace_id, removed = keys.len(), "cleared trace state");
        let mut conn = self.connection()?;
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), StateError> {
        self.conn.lock().take();
        Ok(())
    }
}

impl std::fmt::Debug for RedisStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStateStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}
