use std::sync::Arc;

use async_trait::async_trait;

use super::subscriber::{SubscriberSet, Subscription};
use super::{BusError, MessageBus};
use crate::event::FlowEvent;
use crate::observer::NoticePublisher;

/// Single-process bus: `publish` dispatches matching handlers inline.
///
/// Because dispatch happens inside `publish`, the call only returns once
/// every matched handler has run to completion, including any events those
/// handlers emitted along the way. A whole causal chain of emissions
/// finishes before the outermost `publish` returns.
#[derive(Debug)]
pub struct InProcessBus {
    subscribers: SubscriberSet,
}

impl InProcessBus {
    pub fn new(notices: NoticePublisher) -> Self {
        Self {
            subscribers: SubscriberSet::new(notices),
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(NoticePublisher::disabled())
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, event: FlowEvent) -> Result<(), BusError> {
        self.subscribers.dispatch(Arc::new(event)).await;
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) {
        self.subscribers.subscribe(subscription);
    }

    fn subscriptions(&self) -> Arc<Vec<Subscription>> {
        self.subscribers.snapshot()
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        Ok(())
    }
}
