use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{error, trace};

use super::BoxError;
use crate::event::FlowEvent;
use crate::observer::{FlowNotice, NoticePublisher};
use crate::pattern::TopicPattern;

/// Receives events whose topic matched a subscription pattern.
///
/// Implementations are invoked with a shared event and must never mutate it;
/// reactions happen by emitting new events. Returning an error marks the
/// step failed for this event only.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<FlowEvent>) -> Result<(), BoxError>;
}

/// One step's interest in a topic pattern.
#[derive(Clone)]
pub struct Subscription {
    pub pattern: TopicPattern,
    pub step_id: crate::registry::StepId,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    pub fn new(
        pattern: TopicPattern,
        step_id: crate::registry::StepId,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            pattern,
            step_id,
            handler,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("step_id", &self.step_id)
            .finish_non_exhaustive()
    }
}

/// Shared dispatch core used by every bus transport.
///
/// Subscriptions live behind a copy-on-write snapshot: dispatch clones the
/// current `Arc` and iterates without holding any lock, so a subscription
/// added mid-flight becomes visible to the next event, never a current one.
pub struct SubscriberSet {
    subscriptions: RwLock<Arc<Vec<Subscription>>>,
    notices: NoticePublisher,
}

impl SubscriberSet {
    pub fn new(notices: NoticePublisher) -> Self {
        Self {
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            notices,
        }
    }

    /// Appends a subscription by swapping in a fresh snapshot.
    pub fn subscribe(&self, subscription: Subscription) {
        let mut guard = self.subscriptions.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(subscription);
        *guard = Arc::new(next);
    }

    /// Current subscription snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Subscription>> {
        Arc::clone(&self.subscriptions.read())
    }

    /// Delivers an event to every matching step, in registration order.
    /// A step with several overlapping patterns still receives the event
    /// once. Handler failures are logged, reported to the observer, and
    /// swallowed; the event is simply dropped for that step.
    pub async fn dispatch(&self, event: Arc<FlowEvent>) {
        let snapshot = self.snapshot();
        let mut seen = FxHashSet::default();
        let matched: Vec<&Subscription> = snapshot
            .iter()
            .filter(|sub| sub.pattern.matches(&event.topic) && seen.insert(&sub.step_id))
            .collect();

        if matched.is_empty() {
            trace!(topic = %event.topic, "event matched no subscriptions");
            return;
        }

        self.notices.send(FlowNotice::EventPublished {
            topic: event.topic.clone(),
            trace_id: event.metadata.trace_id.clone(),
            emitted_by: event.metadata.emitted_by.clone(),
            matched_steps: matched.iter().map(|sub| sub.step_id.clone()).collect(),
        });

        for subscription in matched {
            match subscription.handler.handle(Arc::clone(&event)).await {
                Ok(()) => {
                    self.notices.send(FlowNotice::StepCompleted {
                        step_id: subscription.step_id.clone(),
                        topic: event.topic.clone(),
                        trace_id: event.metadata.trace_id.clone(),
                    });
                }
                Err(error) => {
                    error!(
                        step = %subscription.step_id,
                        topic = %event.topic,
                        trace = %event.metadata.trace_id,
                        %error,
                        "step handler failed; event dropped for this step"
                    );
                    self.notices.send(FlowNotice::StepFailed {
                        step_id: subscription.step_id.clone(),
                        topic: event.topic.clone(),
                        trace_id: event.metadata.trace_id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("subscriptions", &self.subscriptions.read().len())
            .finish_non_exhaustive()
    }
}
