//! Redis pub/sub transport for runtimes spanning multiple processes.
//!
//! Events are serialized to JSON and PUBLISHed on `{prefix}{topic}`. Every
//! connected runtime psubscribes to `{prefix}*` and dispatches whatever
//! arrives through its own subscriber set, so each process delivers each
//! event to its locally registered steps, the publishing process included.
//!
//! Unlike the in-process transport, `publish` returns once Redis accepts
//! the message; handlers run later on the receiver task. Delivery remains
//! at-least-once for live subscribers, with no ordering promise across
//! distinct subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::oneshot;
use tokio::task;
use tracing::{debug, instrument, warn};

use super::subscriber::{SubscriberSet, Subscription};
use super::{BusError, MessageBus};
use crate::event::FlowEvent;
use crate::observer::NoticePublisher;

/// [`MessageBus`] backed by Redis pub/sub.
pub struct RedisBus {
    conn: Mutex<Option<ConnectionManager>>,
    channel_prefix: String,
    subscribers: Arc<SubscriberSet>,
    listener: Mutex<Option<ListenerState>>,
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl RedisBus {
    /// Connects, psubscribes to the prefixed channel space, and spawns the
    /// receiver task that feeds incoming events into dispatch.
    #[instrument(skip(url, channel_prefix, notices), err)]
    pub async fn connect(
        url: &str,
        channel_prefix: impl Into<String>,
        notices: NoticePublisher,
    ) -> Result<Self, BusError> {
        let channel_prefix = channel_prefix.into();
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{channel_prefix}*")).await?;
        debug!(prefix = %channel_prefix, "redis bus subscribed");

        let subscribers = Arc::new(SubscriberSet::new(notices));
        let task_subscribers = Arc::clone(&subscribers);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    msg = stream.next() => match msg {
                        None => {
                            warn!("redis bus subscription stream ended");
                            break;
                        }
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(error) => {
                                    warn!(%error, "unreadable bus payload; dropping");
                                    continue;
                                }
                            };
                            match serde_json::from_str::<FlowEvent>(&payload) {
                                Ok(event) => task_subscribers.dispatch(Arc::new(event)).await,
                                Err(error) => {
                                    warn!(%error, "malformed event on bus channel; dropping");
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            channel_prefix,
            subscribers,
            listener: Mutex::new(Some(ListenerState {
                shutdown_tx,
                handle,
            })),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, BusError> {
        self.conn.lock().clone().ok_or(BusError::Closed)
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, event: FlowEvent) -> Result<(), BusError> {
        let payload = serde_json::to_string(&event)?;
        let channel = format!("{}{}", self.channel_prefix, event.topic);
        let mut conn = self.connection()?;
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) {
        self.subscribers.subscribe(subscription);
    }

    fn subscriptions(&self) -> Arc<Vec<Subscription>> {
        self.subscribers.snapshot()
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        let state = { self.listener.lock().take() };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
        self.conn.lock().take();
        Ok(())
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        if let Some(state) = self.listener.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("channel_prefix", &self.channel_prefix)
            .finish_non_exhaustive()
    }
}
