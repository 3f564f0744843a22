use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{BusError, InProcessBus, MessageBus};
#[cfg(feature = "redis-backend")]
use crate::bus::RedisBus;
use crate::endpoints::EndpointManager;
use crate::event::{EventDraft, EventMetadata, TraceId, new_trace_id};
use crate::executor::{LocalExecutor, StepHandler};
use crate::observer::{ObserverHub, ObserverSink, WorkflowDescription};
use crate::registry::{EventRouter, FlowEmitter, RouterError, StepDefinition, StepId};
use crate::runtime::config::{BusConfig, ConfigError, RuntimeConfig, StateConfig};
use crate::state::{MemoryStateStore, StateError, StateStore, TraceState};
#[cfg(feature = "redis-backend")]
use crate::state::RedisStateStore;

#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("invalid trace id {trace_id:?}: {reason}")]
    #[diagnostic(
        code(steploom::runtime::invalid_trace),
        help("Pass None to have the runtime generate a trace id.")
    )]
    InvalidTraceId { trace_id: String, reason: &'static str },

    #[error("local step {step_id} was registered without a handler")]
    #[diagnostic(
        code(steploom::runtime::missing_handler),
        help("Use StepRegistration::local, or assign the step to an endpoint.")
    )]
    MissingHandler { step_id: StepId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// A step definition paired with the code that should run for it.
///
/// Local steps carry a handler; remote steps leave it `None` because their
/// code travels to a worker endpoint instead.
pub struct StepRegistration {
    pub definition: StepDefinition,
    pub handler: Option<Arc<dyn StepHandler>>,
}

impl StepRegistration {
    pub fn local(definition: StepDefinition, handler: impl StepHandler + 'static) -> Self {
        Self {
            definition,
            handler: Some(Arc::new(handler)),
        }
    }

    pub fn local_arc(definition: StepDefinition, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            definition,
            handler: Some(handler),
        }
    }

    pub fn remote(definition: StepDefinition) -> Self {
        Self {
            definition,
            handler: None,
        }
    }
}

impl std::fmt::Debug for StepRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistration")
            .field("definition", &self.definition)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Assembles a [`FlowRuntime`] from configuration plus optional overrides.
///
/// Injected bus/state instances take precedence over whatever the config
/// would have constructed, which is how tests plug in shared fakes.
#[derive(Default)]
pub struct FlowRuntimeBuilder {
    config: RuntimeConfig,
    bus: Option<Arc<dyn MessageBus>>,
    state: Option<Arc<dyn StateStore>>,
    sinks: Vec<Box<dyn ObserverSink>>,
}

impl FlowRuntimeBuilder {
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Adds an observer sink that will receive runtime notices.
    #[must_use]
    pub fn with_sink<T: ObserverSink + 'static>(mut self, sink: T) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Builds the runtime: starts the observer, connects backends, registers
    /// the configured endpoint pool, and starts health monitoring.
    ///
    /// Endpoints that fail their startup checks are logged and left in the
    /// pool as unhealthy; the monitor keeps probing them.
    pub async fn build(self) -> Result<FlowRuntime, RuntimeError> {
        let FlowRuntimeBuilder {
            config,
            bus,
            state,
            sinks,
        } = self;

        let observer = Arc::new(if sinks.is_empty() {
            ObserverHub::default()
        } else {
            ObserverHub::with_sinks(sinks)
        });
        observer.listen();
        let notices = observer.publisher();

        let state: Arc<dyn StateStore> = match state {
            Some(state) => state,
            None => match &config.state {
                StateConfig::Memory { key_prefix } => {
                    Arc::new(MemoryStateStore::new(key_prefix.clone()))
                }
                #[cfg(feature = "redis-backend")]
                StateConfig::Redis { url, key_prefix } => {
                    Arc::new(RedisStateStore::connect(url, key_prefix.clone()).await?)
                }
            },
        };

        let bus: Arc<dyn MessageBus> = match bus {
            Some(bus) => bus,
            None => match &config.bus {
                BusConfig::InProcess => Arc::new(InProcessBus::new(notices.clone())),
                #[cfg(feature = "redis-backend")]
                BusConfig::Redis {
                    url,
                    channel_prefix,
                } => Arc::new(RedisBus::connect(url, channel_prefix.clone(), notices.clone()).await?),
            },
        };

        let endpoints = Arc::new(EndpointManager::new(config.supervision.clone(), notices));
        for def in &config.endpoints {
            if let Err(err) = endpoints
                .register_endpoint(&def.name, &def.url, &def.runtime_kind)
                .await
            {
                error!(
                    endpoint = %def.name,
                    error = %err,
                    "endpoint failed startup checks; health monitor will keep probing"
                );
            }
        }
        endpoints.start_monitor();

        let executor = Arc::new(LocalExecutor::new());
        let router = Arc::new(EventRouter::new(
            Arc::clone(&bus),
            executor,
            Arc::clone(&endpoints),
            Arc::clone(&state),
        ));
        let emitter = router.emitter();

        info!(endpoints = config.endpoints.len(), "flow runtime ready");
        Ok(FlowRuntime {
            config,
            bus,
            state,
            endpoints,
            router,
            observer,
            emitter,
        })
    }
}

/// The assembled orchestration runtime.
///
/// `FlowRuntime` wires the message bus, step router, local executor,
/// endpoint manager, state store, and observer hub into one facade:
///
/// - **Triggering**: [`emit`](Self::emit) publishes an event under a trace id
/// - **Registration**: [`register_step`](Self::register_step) routes a
///   definition to the local executor or a worker endpoint
/// - **State**: [`trace_state`](Self::trace_state) scopes reads/writes to one
///   flow execution
/// - **Introspection**: [`describe`](Self::describe) reports the registered
///   topology
///
/// With the in-process bus, `emit` returns only after the entire causal
/// chain of steps triggered by the event has finished, so a test can emit
/// and then assert on state immediately.
///
/// # Example
///
/// ```rust,no_run
/// use serde_json::json;
/// use steploom::registry::StepDefinition;
/// use steploom::runtime::{FlowRuntime, StepRegistration};
/// # use steploom::executor::{StepContext, StepError, StepHandler};
/// # struct Greet;
/// # #[async_trait::async_trait]
/// # impl StepHandler for Greet {
/// #     async fn run(&self, _data: serde_json::Value, _ctx: StepContext) -> Result<(), StepError> {
/// #         Ok(())
/// #     }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = FlowRuntime::builder().build().await?;
///
/// let greet = StepDefinition::new("steps/greet.rs").subscribe_to("user.created");
/// runtime.register_step(StepRegistration::local(greet, Greet)).await?;
///
/// let trace = runtime.emit("user.created", json!({"name": "ada"}), None).await?;
/// println!("flow {trace} finished");
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct FlowRuntime {
    config: RuntimeConfig,
    bus: Arc<dyn MessageBus>,
    state: Arc<dyn StateStore>,
    endpoints: Arc<EndpointManager>,
    router: Arc<EventRouter>,
    observer: Arc<ObserverHub>,
    emitter: FlowEmitter,
}

impl FlowRuntime {
    #[must_use]
    pub fn builder() -> FlowRuntimeBuilder {
        FlowRuntimeBuilder::default()
    }

    /// Builds a runtime from `STEPLOOM_*` environment variables.
    pub async fn from_env() -> Result<Self, RuntimeError> {
        Self::builder()
            .with_config(RuntimeConfig::from_env()?)
            .build()
            .await
    }

    /// Publishes a trigger event and returns the trace id the resulting flow
    /// runs under.
    ///
    /// Supplying `trace_id` threads the event into an existing flow;
    /// `None` starts a fresh one.
    pub async fn emit(
        &self,
        topic: impl Into<String>,
        data: Value,
        trace_id: Option<TraceId>,
    ) -> Result<TraceId, RuntimeError> {
        let topic = topic.into();
        let trace_id = match trace_id {
            Some(supplied) => validate_trace_id(supplied)?,
            None => new_trace_id(),
        };
        debug!(topic = %topic, trace = %trace_id, "trigger event");
        self.emitter
            .emit(
                EventDraft::new(topic, data),
                &trace_id,
                None,
                EventMetadata::SOURCE_TRIGGER,
            )
            .await?;
        Ok(trace_id)
    }

    /// Registers a step, routing it to the local executor or to its endpoint
    /// based on the definition.
    ///
    /// Re-registering an already known step swaps its code in place while
    /// existing subscriptions keep routing to it.
    #[instrument(skip(self, registration), fields(step = %registration.definition.id), err)]
    pub async fn register_step(&self, registration: StepRegistration) -> Result<(), RuntimeError> {
        let StepRegistration {
            definition,
            handler,
        } = registration;
        if definition.runs_locally() {
            let Some(handler) = handler else {
                return Err(RuntimeError::MissingHandler {
                    step_id: definition.id,
                });
            };
            self.router.register_local_step(definition, handler)?;
        } else {
            if handler.is_some() {
                warn!(step = %definition.id, "handler ignored for endpoint-assigned step");
            }
            self.router.register_remote_step(definition).await?;
        }
        Ok(())
    }

    /// Registers a batch of steps, skipping (and logging) the ones that fail.
    /// Returns how many registered successfully.
    pub async fn load_steps(&self, registrations: Vec<StepRegistration>) -> usize {
        let mut registered = 0;
        for registration in registrations {
            let step_id = registration.definition.id.clone();
            match self.register_step(registration).await {
                Ok(()) => registered += 1,
                Err(err) => {
                    error!(step = %step_id, error = %err, "skipping step registration");
                }
            }
        }
        registered
    }

    /// Swaps the code of a registered local step without touching its
    /// subscriptions.
    pub fn reload_step(
        &self,
        step_id: &StepId,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), RuntimeError> {
        self.router.reload_local_step(step_id, handler)?;
        Ok(())
    }

    /// Re-uploads a remote step's code to its endpoint from the recorded
    /// source location.
    pub async fn reload_remote_step(&self, step_id: &StepId) -> Result<(), RuntimeError> {
        self.endpoints
            .reload_component(step_id)
            .await
            .map_err(RouterError::Endpoint)?;
        Ok(())
    }

    /// Reports the registered topology: one node per step plus the edges
    /// implied by emitted topics matching subscriptions.
    #[must_use]
    pub fn describe(&self) -> WorkflowDescription {
        self.router.describe()
    }

    #[must_use]
    pub fn state(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.state)
    }

    /// State handle pinned to one trace.
    #[must_use]
    pub fn trace_state(&self, trace_id: impl Into<TraceId>) -> TraceState {
        TraceState::new(Arc::clone(&self.state), trace_id)
    }

    #[must_use]
    pub fn endpoint_manager(&self) -> &EndpointManager {
        &self.endpoints
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Attaches another observer sink while the runtime is live.
    pub fn add_observer_sink<T: ObserverSink + 'static>(&self, sink: T) {
        self.observer.add_sink(sink);
    }

    /// Stops monitoring, closes the bus, clears expired state, and drains the
    /// observer. Errors on the way down are logged rather than returned.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("flow runtime shutting down");
        self.endpoints.shutdown().await;
        if let Err(err) = self.bus.shutdown().await {
            warn!(error = %err, "bus shutdown reported an error");
        }
        if let Err(err) = self.state.cleanup().await {
            warn!(error = %err, "state cleanup reported an error");
        }
        self.observer.stop().await;
    }
}

impl std::fmt::Debug for FlowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate_trace_id(trace_id: TraceId) -> Result<TraceId, RuntimeError> {
    if trace_id.is_empty() {
        return Err(RuntimeError::InvalidTraceId {
            trace_id,
            reason: "must not be empty",
        });
    }
    if trace_id.contains(':') {
        return Err(RuntimeError::InvalidTraceId {
            trace_id,
            reason: "must not contain ':'",
        });
    }
    Ok(trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_validation() {
        assert!(validate_trace_id("abc-123".to_owned()).is_ok());
        assert!(matches!(
            validate_trace_id(String::new()),
            Err(RuntimeError::InvalidTraceId { .. })
        ));
        assert!(matches!(
            validate_trace_id("a:b".to_owned()),
            Err(RuntimeError::InvalidTraceId { .. })
        ));
    }
}
