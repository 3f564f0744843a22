/*!
Trace-scoped key/value state shared by steps in a flow.

Every read and write is namespaced by trace id: two flow executions never
see each other's entries even when they use the same logical key. Backends
store entries under `{prefix}{trace_id}:{key}`, so the same data written by
the in-memory store and the Redis store lands under identical keys.

[`StateStore`] is the backend seam. [`MemoryStateStore`] is the default and
suits single-process runtimes and tests; [`RedisStateStore`] (behind the
`redis-backend` feature) shares state between distributed runtime processes.
Steps never talk to a backend directly; they go through the [`TraceState`]
handle their context hands them, which pins the trace id.
*/

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::event::TraceId;

pub use memory::MemoryStateStore;
#[cfg(feature = "redis-backend")]
pub use redis::RedisStateStore;

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "steploom:state:";

/// Raised by state backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("state store is closed")]
    #[diagnostic(
        code(steploom::state::closed),
        help("the runtime released this store during shutdown; build a new runtime before touching state")
    )]
    Closed,

    #[error("state backend error: {0}")]
    #[diagnostic(code(steploom::state::backend))]
    Backend(String),

    #[error("state value serialization failed: {0}")]
    #[diagnostic(code(steploom::state::serde))]
    Serde(#[from] serde_json::Error),
}

#[cfg(feature = "redis-backend")]
impl From<::redis::RedisError> for StateError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Storage backend for trace-scoped state.
///
/// Implementations must keep traces isolated from each other and honor the
/// optional per-entry time-to-live.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetches the value stored under `key` for `trace_id`, if any.
    async fn get(&self, trace_id: &str, key: &str) -> Result<Option<Value>, StateError>;

    /// Stores `value` under `key` for `trace_id`, replacing any previous
    /// value. A `ttl` makes the entry disappear after the given duration.
    async fn set(
        &self,
        trace_id: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Removes a single entry. Removing an absent entry is not an error.
    async fn delete(&self, trace_id: &str, key: &str) -> Result<(), StateError>;

    /// Removes every entry belonging to `trace_id`.
    async fn clear(&self, trace_id: &str) -> Result<(), StateError>;

    /// Releases backend resources. The store may reject further calls with
    /// [`StateError::Closed`] afterwards.
    async fn cleanup(&self) -> Result<(), StateError>;
}

/// Builds the full backend key for one entry.
pub(crate) fn scoped_key(prefix: &str, trace_id: &str, key: &str) -> String {
    format!("{prefix}{trace_id}:{key}")
}

/// Builds the key prefix covering every entry of one trace.
pub(crate) fn trace_prefix(prefix: &str, trace_id: &str) -> String {
    format!("{prefix}{trace_id}:")
}

/// Handle binding a [`StateStore`] to one trace id.
///
/// This is what step handlers see as `ctx.state()`; the trace id is pinned
/// so a step cannot accidentally reach into another flow's entries.
#[derive(Clone)]
pub struct TraceState {
    store: Arc<dyn StateStore>,
    trace_id: TraceId,
}

impl TraceState {
    pub fn new(store: Arc<dyn StateStore>, trace_id: impl Into<TraceId>) -> Self {
        Self {
            store,
            trace_id: trace_id.into(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.store.get(&self.trace_id, key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.store.set(&self.trace_id, key, value, None).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), StateError> {
        self.store.set(&self.trace_id, key, value, Some(ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.store.delete(&self.trace_id, key).await
    }

    pub async fn clear(&self) -> Result<(), StateError> {
        self.store.clear(&self.trace_id).await
    }
}

impl std::fmt::Debug for TraceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceState")
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}
