use std::fmt;
use std::sync::{Arc, Weak};

use crate::bus::{BusError, MessageBus};
use crate::event::{EventDraft, EventMetadata, FlowEvent};
use crate::registry::StepId;

/// The one place events acquire their metadata envelope.
///
/// Every emission path in the runtime funnels through here: trigger
/// adapters, step contexts, and worker endpoint responses. Whatever a
/// caller claims about trace or origin is discarded; the emitter stamps
/// trace id, source, emitting step, and timestamp itself before handing
/// the finished event to the bus.
///
/// Holds the bus weakly so cloned emitters captured inside subscriptions
/// never keep a dropped runtime's bus alive; emitting after the runtime is
/// gone yields [`BusError::Closed`].
#[derive(Clone)]
pub struct FlowEmitter {
    bus: Weak<dyn MessageBus>,
}

impl FlowEmitter {
    pub(crate) fn new(bus: &Arc<dyn MessageBus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }

    /// Stamps a draft into a full event and publishes it.
    pub async fn emit(
        &self,
        draft: EventDraft,
        trace_id: &str,
        emitted_by: Option<&StepId>,
        source: &str,
    ) -> Result<(), BusError> {
        let bus = self.bus.upgrade().ok_or(BusError::Closed)?;
        let event = FlowEvent::new(
            draft.topic,
            draft.data,
            EventMetadata::stamped(trace_id, source, emitted_by.cloned()),
        );
        bus.publish(event).await
    }
}

impl fmt::Debug for FlowEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowEmitter").finish_non_exhaustive()
    }
}
