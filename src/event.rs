/*!
Core event model shared by every subsystem.

An event is a named occurrence flowing through the bus: a `topic` string
(serialized as `"type"` on the wire), an arbitrary JSON `data` payload, and
the [`EventMetadata`] envelope the runtime stamps at emission time.

Events are treated as immutable after publication. Handlers receive shared
references and never mutate payloads in place; anything a step wants to say
back to the world is said by emitting a new event.
*/

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id tying together every event in one logical flow execution.
///
/// Sixteen lowercase hex characters. Generated by [`new_trace_id`] when a
/// trigger does not supply one. Must not contain `:`, which the state store
/// uses as a key separator.
pub type TraceId = String;

/// Generates a fresh random trace id.
#[must_use]
pub fn new_trace_id() -> TraceId {
    format!("{:016x}", rand::rng().random::<u64>())
}

/// Envelope stamped onto every published event by the emission choke point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Flow execution this event belongs to.
    pub trace_id: TraceId,
    /// What produced the event: a trigger adapter, a step, or a worker
    /// endpoint relaying a step's output.
    pub source: String,
    /// Step that emitted this event, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_by: Option<crate::registry::StepId>,
    /// Emission time in UTC.
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Source tag for events published by inbound trigger adapters.
    pub const SOURCE_TRIGGER: &'static str = "trigger";
    /// Source tag for events emitted by a step handler mid-flow.
    pub const SOURCE_STEP: &'static str = "step";
    /// Source tag for events a worker endpoint returned from execution.
    pub const SOURCE_ENDPOINT: &'static str = "endpoint";

    /// Builds a metadata envelope stamped with the current time.
    #[must_use]
    pub fn stamped(
        trace_id: impl Into<TraceId>,
        source: impl Into<String>,
        emitted_by: Option<crate::registry::StepId>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            source: source.into(),
            emitted_by,
            timestamp: Utc::now(),
        }
    }
}

/// A fully-formed event as it travels over the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Topic name, e.g. `"order.created"`. Serialized as `"type"`.
    #[serde(rename = "type")]
    pub topic: String,
    /// Arbitrary JSON payload.
    pub data: Value,
    /// Runtime-stamped envelope.
    pub metadata: EventMetadata,
}

impl FlowEvent {
    pub fn new(topic: impl Into<String>, data: Value, metadata: EventMetadata) -> Self {
        Self {
            topic: topic.into(),
            data,
            metadata,
        }
    }

    /// Convenience constructor for trigger-sourced events, mostly used in
    /// tests and demo wiring.
    #[must_use]
    pub fn trigger(topic: impl Into<String>, data: Value, trace_id: impl Into<TraceId>) -> Self {
        Self::new(
            topic,
            data,
            EventMetadata::stamped(trace_id, EventMetadata::SOURCE_TRIGGER, None),
        )
    }

    /// JSON form of the event, as it would appear on a wire transport.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// An event as proposed by a step or a worker endpoint, before the runtime
/// stamps metadata onto it.
///
/// Worker endpoints may include a `metadata` field in their responses; it is
/// accepted during deserialization and then discarded, because the envelope
/// is always re-stamped at the emission choke point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(rename = "type")]
    pub topic: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl EventDraft {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            metadata: None,
        }
    }
}
