use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::{EndpointError, EndpointStatus, RuntimeEndpoint, SupervisionConfig};
use crate::event::{EventDraft, EventMetadata, FlowEvent};
use crate::observer::{FlowNotice, NoticePublisher};
use crate::registry::StepId;

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    data: &'a Value,
    metadata: &'a EventMetadata,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    events: Vec<EventDraft>,
}

#[derive(Clone, Debug)]
struct ComponentRegistration {
    endpoint: String,
    code_location: String,
}

struct MonitorState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

struct ManagerInner {
    endpoints: RwLock<FxHashMap<String, Arc<RuntimeEndpoint>>>,
    registrations: RwLock<Arc<FxHashMap<StepId, ComponentRegistration>>>,
    client: reqwest::Client,
    supervision: SupervisionConfig,
    notices: NoticePublisher,
}

/// Owns the worker endpoint pool and all HTTP traffic to it.
pub struct EndpointManager {
    inner: Arc<ManagerInner>,
    monitor: Mutex<Option<MonitorState>>,
}

impl EndpointManager {
    pub fn new(supervision: SupervisionConfig, notices: NoticePublisher) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                endpoints: RwLock::new(FxHashMap::default()),
                registrations: RwLock::new(Arc::new(FxHashMap::default())),
                client: reqwest::Client::new(),
                supervision,
                notices,
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Adds an endpoint to the pool and walks it to `Ready`.
    ///
    /// The endpoint starts `Initializing`, gets `startup_grace` to boot, and
    /// is then probed up to `max_retries` times with `retry_delay` between
    /// attempts. The first 2xx makes it `Ready`; exhausting the budget makes
    /// it `Unhealthy` and fails this call. An unhealthy endpoint stays in
    /// the pool, where the monitor may still recover it later.
    #[instrument(skip(self, url, runtime_kind), err)]
    pub async fn register_endpoint(
        &self,
        name: &str,
        url: &str,
        runtime_kind: &str,
    ) -> Result<(), EndpointError> {
        let endpoint = Arc::new(RuntimeEndpoint::new(name, url, runtime_kind));
        self.inner
            .endpoints
            .write()
            .insert(name.to_owned(), Arc::clone(&endpoint));
        info!(
            endpoint = %name,
            url = %endpoint.url(),
            kind = %runtime_kind,
            "endpoint registered; waiting out startup grace"
        );
        tokio::time::sleep(self.inner.supervision.startup_grace).await;

        let max = self.inner.supervision.max_retries;
        for attempt in 1..=max {
            if self.inner.probe(&endpoint).await {
                self.inner.transition(&endpoint, EndpointStatus::Ready);
                info!(endpoint = %name, attempt, "endpoint healthy");
                return Ok(());
            }
            debug!(endpoint = %name, attempt, max, "startup health probe failed");
            if attempt < max {
                tokio::time::sleep(self.inner.supervision.retry_delay).await;
            }
        }
        self.inner.transition(&endpoint, EndpointStatus::Unhealthy);
        Err(EndpointError::NeverHealthy {
            name: name.to_owned(),
            attempts: max,
        })
    }

    /// Uploads a component's source to a `Ready` endpoint.
    ///
    /// The upload is retried through the supervision retry budget; running
    /// out of budget fails loudly and records nothing.
    #[instrument(skip(self, code_location), err)]
    pub async fn register_component(
        &self,
        code_location: &str,
        endpoint_name: &str,
        step_id: &StepId,
    ) -> Result<(), EndpointError> {
        let endpoint = self.endpoint(endpoint_name)?;
        if endpoint.status() != EndpointStatus::Ready {
            return Err(EndpointError::NotReady {
                name: endpoint_name.to_owned(),
                status: endpoint.status(),
            });
        }

        let code = tokio::fs::read_to_string(code_location)
            .await
            .map_err(|source| EndpointError::CodeUnreadable {
                path: code_location.to_owned(),
                source,
            })?;
        let url = format!("{}/register", endpoint.url());
        let body = RegisterRequest {
            name: step_id.as_str(),
            code: &code,
        };

        let max = self.inner.supervision.max_retries;
        let mut last_error = String::new();
        for attempt in 1..=max {
            match self.inner.client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    self.record_registration(step_id, endpoint_name, code_location);
                    info!(step = %step_id, endpoint = %endpoint_name, attempt, "component registered");
                    return Ok(());
                }
                Ok(response) => {
                    last_error = format!("endpoint returned {}", response.status());
                }
                Err(error) => {
                    last_error = error.to_string();
                }
            }
            debug!(
                step = %step_id,
                endpoint = %endpoint_name,
                attempt,
                max,
                error = %last_error,
                "component upload failed"
            );
            if attempt < max {
                tokio::time::sleep(self.inner.supervision.retry_delay).await;
            }
        }
        Err(EndpointError::UploadFailed {
            step_id: step_id.clone(),
            name: endpoint_name.to_owned(),
            attempts: max,
            reason: last_error,
        })
    }

    /// Re-reads a registered component's source from disk and uploads it
    /// again, keeping its endpoint assignment. This is the hot reload path
    /// for remote steps: the id and its subscriptions stay untouched.
    pub async fn reload_component(&self, step_id: &StepId) -> Result<(), EndpointError> {
        let registration = self
            .inner
            .registrations
            .read()
            .get(step_id)
            .cloned()
            .ok_or_else(|| EndpointError::Unregistered {
                step_id: step_id.clone(),
            })?;
        self.register_component(&registration.code_location, &registration.endpoint, step_id)
            .await
    }

    /// Executes a registered component against one event.
    ///
    /// A non-`Ready` endpoint fails the call before any request leaves the
    /// process. Execution is never retried: the caller treats any error here
    /// as a per-event step failure and drops the event for this step.
    pub async fn execute_component(
        &self,
        step_id: &StepId,
        event: &FlowEvent,
    ) -> Result<Vec<EventDraft>, EndpointError> {
        let registration = self
            .inner
            .registrations
            .read()
            .get(step_id)
            .cloned()
            .ok_or_else(|| EndpointError::Unregistered {
                step_id: step_id.clone(),
            })?;
        let endpoint = self.endpoint(&registration.endpoint)?;
        if endpoint.status() != EndpointStatus::Ready {
            return Err(EndpointError::Unavailable {
                name: registration.endpoint,
            });
        }

        let url = format!("{}/execute/{}", endpoint.url(), step_id);
        let body = ExecuteRequest {
            data: &event.data,
            metadata: &event.metadata,
        };
        let response = self.inner.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(EndpointError::ExecutionFailed {
                step_id: step_id.clone(),
                status: response.status().as_u16(),
            });
        }
        let parsed: ExecuteResponse = response.json().await?;
        Ok(parsed.events)
    }

    /// Spawns the background health monitor. Idempotent.
    pub fn start_monitor(&self) {
        let mut guard = self.monitor.lock();
        if guard.is_some() {
            return; // Already monitoring
        }

        let inner = Arc::clone(&self.inner);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        // interval() panics on a zero period
        let period = inner
            .supervision
            .health_interval
            .max(Duration::from_millis(1));

        let handle = task::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick is immediate
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => inner.probe_all().await,
                }
            }
        });

        *guard = Some(MonitorState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background monitor task.
    pub async fn stop_monitor(&self) {
        let state = { self.monitor.lock().take() };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }

    /// Re-probes every endpoint once, flipping statuses as the monitor
    /// would. Public so operational tooling can force a sweep.
    pub async fn probe_endpoints(&self) {
        self.inner.probe_all().await;
    }

    /// Endpoint pool snapshot, sorted by name.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<RuntimeEndpoint>> {
        let mut list: Vec<_> = self.inner.endpoints.read().values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Current status of one endpoint, if registered.
    #[must_use]
    pub fn endpoint_status(&self, name: &str) -> Option<EndpointStatus> {
        self.inner
            .endpoints
            .read()
            .get(name)
            .map(|endpoint| endpoint.status())
    }

    /// Stops background work. The pool itself stays readable.
    pub async fn shutdown(&self) {
        self.stop_monitor().await;
    }

    fn endpoint(&self, name: &str) -> Result<Arc<RuntimeEndpoint>, EndpointError> {
        self.inner
            .endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EndpointError::UnknownEndpoint {
                name: name.to_owned(),
            })
    }

    fn record_registration(&self, step_id: &StepId, endpoint: &str, code_location: &str) {
        let mut guard = self.inner.registrations.write();
        let mut next = (**guard).clone();
        next.insert(
            step_id.clone(),
            ComponentRegistration {
                endpoint: endpoint.to_owned(),
                code_location: code_location.to_owned(),
            },
        );
        *guard = Arc::new(next);
    }
}

impl ManagerInner {
    async fn probe(&self, endpoint: &RuntimeEndpoint) -> bool {
        let url = format!("{}/health", endpoint.url());
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(endpoint = %endpoint.name(), %error, "health probe error");
                false
            }
        }
    }

    async fn probe_all(&self) {
        let endpoints: Vec<Arc<RuntimeEndpoint>> =
            self.endpoints.read().values().cloned().collect();
        for endpoint in endpoints {
            // Registration owns the first transition out of Initializing.
            if endpoint.status() == EndpointStatus::Initializing {
                continue;
            }
            let next = if self.probe(&endpoint).await {
                EndpointStatus::Ready
            } else {
                EndpointStatus::Unhealthy
            };
            self.transition(&endpoint, next);
        }
    }

    fn transition(&self, endpoint: &RuntimeEndpoint, status: EndpointStatus) {
        let previous = endpoint.set_status(status);
        if previous == status {
            return;
        }
        if status == EndpointStatus::Unhealthy {
            warn!(endpoint = %endpoint.name(), from = %previous, "endpoint became unhealthy");
        } else {
            info!(endpoint = %endpoint.name(), from = %previous, to = %status, "endpoint status changed");
        }
        self.notices.send(FlowNotice::EndpointStatusChanged {
            endpoint: endpoint.name().to_owned(),
            status,
        });
    }
}

impl Drop for EndpointManager {
    fn drop(&mut self) {
        if let Some(state) = self.monitor.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

impl std::fmt::Debug for EndpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointManager")
            .field("endpoints", &self.inner.endpoints.read().len())
            .field("registrations", &self.inner.registrations.read().len())
            .finish_non_exhaustive()
    }
}
