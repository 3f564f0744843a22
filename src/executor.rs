//! Local step execution for the steploom orchestration runtime.
//!
//! This module provides the abstractions for steps that run inside the
//! runtime process: the [`StepHandler`] trait, the execution context, the
//! hot-swappable handler table, and error handling.

// Standard library and external crates
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// Internal crate modules
use crate::bus::BusError;
use crate::event::{EventDraft, EventMetadata, FlowEvent, TraceId};
use crate::registry::{FlowEmitter, StepId};
use crate::state::{StateError, StateStore, TraceState};

// ============================================================================
// Core Trait
// ============================================================================

/// Core trait for steps executing in this process.
///
/// A handler receives the triggering event's data payload and a context
/// scoped to the event's trace. It reacts by reading and writing trace
/// state and by emitting new events; it never returns data to its caller.
///
/// # Error Handling
///
/// Returning `Err` marks the step failed for this one event. The failure is
/// logged and reported to observers, and the event is dropped for this step;
/// other subscribers of the same event are unaffected and nothing is retried.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
/// use steploom::executor::{StepContext, StepError, StepHandler};
///
/// struct CreateInvoice;
///
/// #[async_trait]
/// impl StepHandler for CreateInvoice {
///     async fn run(&self, data: Value, ctx: StepContext) -> Result<(), StepError> {
///         let order_id = data
///             .get("orderId")
///             .and_then(Value::as_str)
///             .ok_or(StepError::MissingInput { what: "orderId" })?;
///
///         ctx.state().set("order", data.clone()).await?;
///         ctx.emit("invoice.created", json!({ "orderId": order_id }))
///             .await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute this step against one event's data payload.
    async fn run(&self, data: Value, ctx: StepContext) -> Result<(), StepError>;
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to step handlers.
///
/// Carries the step's identity and the trace id of the triggering event,
/// and exposes the two capabilities a step has: emitting follow-up events
/// and touching trace-scoped state. Events emitted through the context are
/// automatically stamped with this trace id, which is what keeps a causal
/// chain of emissions on one trace.
#[derive(Clone)]
pub struct StepContext {
    /// Step being executed.
    pub step_id: StepId,
    /// Trace of the triggering event.
    pub trace_id: TraceId,
    emitter: FlowEmitter,
    store: Arc<dyn StateStore>,
}

impl StepContext {
    pub fn new(
        step_id: StepId,
        trace_id: impl Into<TraceId>,
        emitter: FlowEmitter,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            step_id,
            trace_id: trace_id.into(),
            emitter,
            store,
        }
    }

    /// Emit a follow-up event on this context's trace.
    pub async fn emit(&self, topic: impl Into<String>, data: Value) -> Result<(), BusError> {
        self.emitter
            .emit(
                EventDraft::new(topic, data),
                &self.trace_id,
                Some(&self.step_id),
                EventMetadata::SOURCE_STEP,
            )
            .await
    }

    /// State handle pinned to this context's trace.
    #[must_use]
    pub fn state(&self) -> TraceState {
        TraceState::new(Arc::clone(&self.store), self.trace_id.clone())
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step_id", &self.step_id)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Handler Table
// ============================================================================

/// Executes locally registered steps by id.
///
/// Handlers live in a copy-on-write table: executions in flight keep the
/// snapshot they started with, and [`LocalExecutor::bind`] on an existing id
/// swaps the handler for all future events. That swap is the whole hot
/// reload mechanism; subscriptions reference the step id, not the handler,
/// so they survive the swap untouched.
#[derive(Default)]
pub struct LocalExecutor {
    handlers: RwLock<Arc<FxHashMap<StepId, Arc<dyn StepHandler>>>>,
}

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds (or replaces) the handler for a step id.
    pub fn bind(&self, step_id: StepId, handler: Arc<dyn StepHandler>) {
        let mut guard = self.handlers.write();
        let mut next = (**guard).clone();
        next.insert(step_id, handler);
        *guard = Arc::new(next);
    }

    /// Whether a handler is currently bound for `step_id`.
    #[must_use]
    pub fn is_bound(&self, step_id: &StepId) -> bool {
        self.handlers.read().contains_key(step_id)
    }

    /// Runs the bound handler for `step_id` against `event`.
    pub async fn execute(
        &self,
        step_id: &StepId,
        event: &FlowEvent,
        ctx: StepContext,
    ) -> Result<(), ExecutorError> {
        let handler = self.handlers.read().get(step_id).cloned();
        let Some(handler) = handler else {
            return Err(ExecutorError::UnknownStep {
                step_id: step_id.clone(),
            });
        };
        debug!(
            step = %step_id,
            topic = %event.topic,
            trace = %event.metadata.trace_id,
            "executing local step"
        );
        handler
            .run(event.data.clone(), ctx)
            .await
            .map_err(|source| ExecutorError::Failed {
                step_id: step_id.clone(),
                source,
            })
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("bound", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors a step handler can raise.
///
/// All of these are per-event failures: they mark the step failed for the
/// event being processed and go no further.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Expected input data is missing from the event payload.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(steploom::step::missing_input),
        help("Check that the emitting step put the required field on the event.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(steploom::step::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(steploom::step::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(steploom::step::validation),
        help("Check the event payload format and required fields.")
    )]
    ValidationFailed(String),

    /// Emitting a follow-up event failed.
    #[error("event bus error: {0}")]
    #[diagnostic(code(steploom::step::emit))]
    Emit(#[from] BusError),

    /// Trace state access failed.
    #[error("state access failed: {0}")]
    #[diagnostic(code(steploom::step::state))]
    State(#[from] StateError),
}

/// Errors raised by the executor itself.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// No handler is bound under the requested id.
    #[error("no local handler bound for step {step_id}")]
    #[diagnostic(
        code(steploom::executor::unknown_step),
        help("Bind a handler for this id before routing events to it.")
    )]
    UnknownStep { step_id: StepId },

    /// The bound handler returned an error.
    #[error("step {step_id} failed")]
    #[diagnostic(code(steploom::executor::step_failed))]
    Failed {
        step_id: StepId,
        #[source]
        source: StepError,
    },
}
