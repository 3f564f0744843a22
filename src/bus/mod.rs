/*!
Message bus: the only path events travel between steps.

The [`MessageBus`] trait is the transport seam. [`InProcessBus`] dispatches
directly inside `publish` and is the default; [`RedisBus`] (behind the
`redis-backend` feature) relays events through Redis pub/sub so multiple
runtime processes can share one topic space.

Both transports route through a [`SubscriberSet`], which owns the pattern
matching and the failure policy: every matching subscription sees every
event at least once, handlers run in registration order for a given event,
and a failing handler never prevents later handlers from running.
*/

mod in_process;
#[cfg(feature = "redis-backend")]
mod redis;
mod subscriber;

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::event::FlowEvent;

pub use in_process::InProcessBus;
#[cfg(feature = "redis-backend")]
pub use redis::RedisBus;
pub use subscriber::{EventHandler, SubscriberSet, Subscription};

/// Channel prefix used by wire transports when none is configured.
pub const DEFAULT_CHANNEL_PREFIX: &str = "steploom:events:";

/// Boxed error step and event handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised by bus transports. Handler failures are not bus errors; they are
/// logged and swallowed inside dispatch.
#[derive(Debug, Error, Diagnostic)]
pub enum BusError {
    #[error("message bus is closed")]
    #[diagnostic(
        code(steploom::bus::closed),
        help("the runtime owning this bus was shut down; emitted events have nowhere to go")
    )]
    Closed,

    #[error("bus transport error: {0}")]
    #[diagnostic(code(steploom::bus::transport))]
    Transport(String),

    #[error("event wire encoding failed: {0}")]
    #[diagnostic(code(steploom::bus::encode))]
    Encode(#[from] serde_json::Error),
}

#[cfg(feature = "redis-backend")]
impl From<::redis::RedisError> for BusError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Transport seam for event delivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Hands an event to the transport. Delivery to matching subscribers is
    /// at-least-once; an `Ok` return means the transport accepted the event,
    /// not that any handler liked it.
    async fn publish(&self, event: FlowEvent) -> Result<(), BusError>;

    /// Adds a subscription. Events already in flight keep the subscriber
    /// snapshot they started with.
    fn subscribe(&self, subscription: Subscription);

    /// Current subscription snapshot.
    fn subscriptions(&self) -> Arc<Vec<Subscription>>;

    /// Stops background transport work. Idempotent.
    async fn shutdown(&self) -> Result<(), BusError>;
}
