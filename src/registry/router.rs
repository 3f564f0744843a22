use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::emitter::FlowEmitter;
use super::step::{StepDefinition, StepId};
use crate::bus::{BoxError, EventHandler, MessageBus, Subscription};
use crate::endpoints::{EndpointError, EndpointManager};
use crate::event::{EventMetadata, FlowEvent};
use crate::executor::{LocalExecutor, StepContext, StepHandler};
use crate::observer::{WorkflowDescription, WorkflowEdge, WorkflowNode};
use crate::pattern::{PatternError, TopicPattern};
use crate::state::StateStore;

/// Errors raised while registering steps.
#[derive(Debug, Error, Diagnostic)]
pub enum RouterError {
    /// A subscription pattern failed to parse.
    #[error("invalid pattern {pattern:?} on step {step_id}")]
    #[diagnostic(code(steploom::registry::pattern))]
    Pattern {
        step_id: StepId,
        pattern: String,
        #[source]
        source: PatternError,
    },

    /// A local registration was attempted for an endpoint-assigned step.
    #[error("step {step_id} is assigned to endpoint {endpoint}; register it as a remote step")]
    #[diagnostic(code(steploom::registry::not_local))]
    NotLocal { step_id: StepId, endpoint: String },

    /// A remote registration was attempted for a step with no endpoint.
    #[error("step {step_id} has no endpoint assignment; register it as a local step")]
    #[diagnostic(code(steploom::registry::not_remote))]
    NotRemote { step_id: StepId },

    /// The step id is not in the registry.
    #[error("no step registered under id {step_id}")]
    #[diagnostic(code(steploom::registry::unknown_step))]
    UnknownStep { step_id: StepId },

    /// Endpoint-side registration failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Routes published events to registered steps.
///
/// Registration is where a step definition becomes live wiring: each of its
/// subscription patterns turns into a bus subscription whose handler runs
/// the step, locally through the [`LocalExecutor`] or remotely through the
/// [`EndpointManager`]. Re-registering an existing id is a hot reload: the
/// code reference is replaced while the id and its subscriptions stay as
/// they were first registered.
pub struct EventRouter {
    bus: Arc<dyn MessageBus>,
    executor: Arc<LocalExecutor>,
    endpoints: Arc<EndpointManager>,
    state: Arc<dyn StateStore>,
    emitter: FlowEmitter,
    steps: RwLock<Arc<FxHashMap<StepId, Arc<StepDefinition>>>>,
}

impl EventRouter {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        executor: Arc<LocalExecutor>,
        endpoints: Arc<EndpointManager>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let emitter = FlowEmitter::new(&bus);
        Self {
            bus,
            executor,
            endpoints,
            state,
            emitter,
            steps: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    /// Emission handle stamping events for this router's bus.
    #[must_use]
    pub fn emitter(&self) -> FlowEmitter {
        self.emitter.clone()
    }

    /// Registers a step that runs in this process.
    #[instrument(skip(self, definition, handler), fields(step = %definition.id), err)]
    pub fn register_local_step(
        &self,
        definition: StepDefinition,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), RouterError> {
        if let Some(endpoint) = definition.endpoint_name() {
            return Err(RouterError::NotLocal {
                step_id: definition.id.clone(),
                endpoint: endpoint.to_owned(),
            });
        }
        let patterns = parse_patterns(&definition)?;

        if self.is_registered(&definition.id) {
            self.executor.bind(definition.id.clone(), handler);
            info!(step = %definition.id, "hot reload: swapped local step code");
            return Ok(());
        }

        self.executor.bind(definition.id.clone(), handler);
        let route_handler: Arc<dyn EventHandler> = Arc::new(LocalStepHandler {
            step_id: definition.id.clone(),
            executor: Arc::clone(&self.executor),
            emitter: self.emitter.clone(),
            state: Arc::clone(&self.state),
        });
        self.subscribe_all(&definition, patterns, route_handler);
        self.insert(definition);
        Ok(())
    }

    /// Registers a step that runs on a worker endpoint.
    ///
    /// Uploads the component source first; a failed upload leaves the step
    /// unregistered and unsubscribed.
    #[instrument(skip(self, definition), fields(step = %definition.id), err)]
    pub async fn register_remote_step(
        &self,
        definition: StepDefinition,
    ) -> Result<(), RouterError> {
        let endpoint = definition
            .endpoint_name()
            .ok_or_else(|| RouterError::NotRemote {
                step_id: definition.id.clone(),
            })?
            .to_owned();
        let patterns = parse_patterns(&definition)?;

        if self.is_registered(&definition.id) {
            self.endpoints
                .register_component(&definition.code_location, &endpoint, &definition.id)
                .await?;
            info!(step = %definition.id, endpoint = %endpoint, "hot reload: re-uploaded remote step code");
            return Ok(());
        }

        self.endpoints
            .register_component(&definition.code_location, &endpoint, &definition.id)
            .await?;
        let route_handler: Arc<dyn EventHandler> = Arc::new(RemoteStepHandler {
            step_id: definition.id.clone(),
            endpoints: Arc::clone(&self.endpoints),
            emitter: self.emitter.clone(),
        });
        self.subscribe_all(&definition, patterns, route_handler);
        self.insert(definition);
        Ok(())
    }

    /// Swaps the handler of an already registered local step.
    pub fn reload_local_step(
        &self,
        step_id: &StepId,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), RouterError> {
        let steps = self.definitions();
        match steps.get(step_id) {
            None => Err(RouterError::UnknownStep {
                step_id: step_id.clone(),
            }),
            Some(def) if !def.runs_locally() => Err(RouterError::NotLocal {
                step_id: step_id.clone(),
                endpoint: def.runtime_label().to_owned(),
            }),
            Some(_) => {
                self.executor.bind(step_id.clone(), handler);
                info!(step = %step_id, "hot reload: swapped local step code");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn is_registered(&self, step_id: &StepId) -> bool {
        self.steps.read().contains_key(step_id)
    }

    /// Registered definitions snapshot.
    #[must_use]
    pub fn definitions(&self) -> Arc<FxHashMap<StepId, Arc<StepDefinition>>> {
        Arc::clone(&self.steps.read())
    }

    /// Builds the workflow topology from registered definitions.
    ///
    /// Nodes are sorted by id. An edge appears for every declared emitted
    /// topic that some other registered step's pattern matches.
    #[must_use]
    pub fn describe(&self) -> WorkflowDescription {
        let steps = self.definitions();
        let mut ordered: Vec<&Arc<StepDefinition>> = steps.values().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let nodes = ordered
            .iter()
            .map(|def| WorkflowNode {
                id: def.id.clone(),
                name: def.name.clone(),
                kind: def.runtime_label().to_owned(),
                subscribes: def.subscribes.clone(),
                emits: def.emits.clone(),
                flow: def.flow.clone(),
            })
            .collect();

        let mut edges = Vec::new();
        for from in &ordered {
            for topic in &from.emits {
                for to in &ordered {
                    let listens = to.subscribes.iter().any(|raw| {
                        TopicPattern::parse(raw).is_ok_and(|pattern| pattern.matches(topic))
                    });
                    if listens {
                        edges.push(WorkflowEdge {
                            from: from.id.clone(),
                            to: to.id.clone(),
                            topic: topic.clone(),
                        });
                    }
                }
            }
        }

        WorkflowDescription { nodes, edges }
    }

    fn subscribe_all(
        &self,
        definition: &StepDefinition,
        patterns: Vec<TopicPattern>,
        handler: Arc<dyn EventHandler>,
    ) {
        if patterns.is_empty() {
            warn!(step = %definition.id, "step has no subscriptions and will never run");
        }
        let count = patterns.len();
        for pattern in patterns {
            self.bus.subscribe(Subscription::new(
                pattern,
                definition.id.clone(),
                Arc::clone(&handler),
            ));
        }
        info!(
            step = %definition.id,
            runtime = %definition.runtime_label(),
            subscriptions = count,
            "step registered"
        );
    }

    fn insert(&self, definition: StepDefinition) {
        let mut guard = self.steps.write();
        let mut next = (**guard).clone();
        next.insert(definition.id.clone(), Arc::new(definition));
        *guard = Arc::new(next);
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("steps", &self.steps.read().len())
            .finish_non_exhaustive()
    }
}

fn parse_patterns(definition: &StepDefinition) -> Result<Vec<TopicPattern>, RouterError> {
    definition
        .subscribes
        .iter()
        .map(|raw| {
            TopicPattern::parse(raw).map_err(|source| RouterError::Pattern {
                step_id: definition.id.clone(),
                pattern: raw.clone(),
                source,
            })
        })
        .collect()
}

/// Bus handler that runs a local step through the executor.
struct LocalStepHandler {
    step_id: StepId,
    executor: Arc<LocalExecutor>,
    emitter: FlowEmitter,
    state: Arc<dyn StateStore>,
}

#[async_trait]
impl EventHandler for LocalStepHandler {
    async fn handle(&self, event: Arc<FlowEvent>) -> Result<(), BoxError> {
        let ctx = StepContext::new(
            self.step_id.clone(),
            event.metadata.trace_id.clone(),
            self.emitter.clone(),
            Arc::clone(&self.state),
        );
        self.executor.execute(&self.step_id, &event, ctx).await?;
        Ok(())
    }
}

/// Bus handler that ships an event to a worker endpoint and republishes
/// whatever events the component answered with, re-stamped on the same
/// trace.
struct RemoteStepHandler {
    step_id: StepId,
    endpoints: Arc<EndpointManager>,
    emitter: FlowEmitter,
}

#[async_trait]
impl EventHandler for RemoteStepHandler {
    async fn handle(&self, event: Arc<FlowEvent>) -> Result<(), BoxError> {
        let drafts = self
            .endpoints
            .execute_component(&self.step_id, &event)
            .await?;
        for draft in drafts {
            self.emitter
                .emit(
                    draft,
                    &event.metadata.trace_id,
                    Some(&self.step_id),
                    EventMetadata::SOURCE_ENDPOINT,
                )
                .await?;
        }
        Ok(())
    }
}
