use std::fmt;

use serde::Serialize;

use crate::endpoints::EndpointStatus;
use crate::event::TraceId;
use crate::registry::StepId;

/// One observable moment in the life of the runtime.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlowNotice {
    /// An event entered the dispatch path.
    #[serde(rename_all = "camelCase")]
    EventPublished {
        topic: String,
        trace_id: TraceId,
        emitted_by: Option<StepId>,
        matched_steps: Vec<StepId>,
    },
    /// A step handler returned successfully.
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        step_id: StepId,
        topic: String,
        trace_id: TraceId,
    },
    /// A step handler failed; the failure was logged and swallowed.
    #[serde(rename_all = "camelCase")]
    StepFailed {
        step_id: StepId,
        topic: String,
        trace_id: TraceId,
        error: String,
    },
    /// A worker endpoint moved between health states.
    #[serde(rename_all = "camelCase")]
    EndpointStatusChanged {
        endpoint: String,
        status: EndpointStatus,
    },
}

impl FlowNotice {
    /// Stable tag for the notice variant, matching the serialized `kind`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EventPublished { .. } => "eventPublished",
            Self::StepCompleted { .. } => "stepCompleted",
            Self::StepFailed { .. } => "stepFailed",
            Self::EndpointStatusChanged { .. } => "endpointStatusChanged",
        }
    }

    /// Trace this notice belongs to, when it belongs to one.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::EventPublished { trace_id, .. }
            | Self::StepCompleted { trace_id, .. }
            | Self::StepFailed { trace_id, .. } => Some(trace_id),
            Self::EndpointStatusChanged { .. } => None,
        }
    }
}

impl fmt::Display for FlowNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventPublished {
                topic,
                trace_id,
                matched_steps,
                ..
            } => write!(
                f,
                "event {topic} [trace {trace_id}] matched {} step(s)",
                matched_steps.len()
            ),
            Self::StepCompleted {
                step_id,
                topic,
                trace_id,
            } => write!(f, "step {step_id} completed {topic} [trace {trace_id}]"),
            Self::StepFailed {
                step_id,
                topic,
                trace_id,
                error,
            } => write!(
                f,
                "step {step_id} failed on {topic} [trace {trace_id}]: {error}"
            ),
            Self::EndpointStatusChanged { endpoint, status } => {
                write!(f, "endpoint {endpoint} is now {status}")
            }
        }
    }
}
