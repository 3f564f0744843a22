/*!
Supervision of external worker endpoints.

A worker endpoint is a long-running HTTP process (any language) that hosts
step components on the runtime's behalf. It speaks a three-route protocol:

- `GET  /health` answers 2xx when the worker is able to take work.
- `POST /register` receives `{name, code}` and loads a component.
- `POST /execute/{stepId}` receives `{data, metadata}` and answers
  `{events: [...]}` with the events the component wants published.

The [`EndpointManager`] owns the endpoint pool: it walks new endpoints from
`Initializing` to `Ready` (or `Unhealthy`) through startup probes, keeps a
background monitor re-probing them, uploads component code, and refuses to
send work to anything that is not currently `Ready`.
*/

mod manager;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::registry::StepId;

pub use manager::EndpointManager;

/// Health state of one worker endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EndpointStatus {
    /// Registered, still inside its startup window.
    Initializing = 0,
    /// Last probe succeeded; eligible for work.
    Ready = 1,
    /// Last probe failed; work addressed to it is dropped.
    Unhealthy = 2,
}

impl EndpointStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Ready,
            2 => Self::Unhealthy,
            _ => Self::Initializing,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(label)
    }
}

/// One worker endpoint in the pool.
///
/// Status lives in an atomic so the monitor task, registration, and the
/// execution path can read and flip it without locking.
#[derive(Debug)]
pub struct RuntimeEndpoint {
    name: String,
    url: String,
    runtime_kind: String,
    status: AtomicU8,
}

impl RuntimeEndpoint {
    pub(crate) fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        runtime_kind: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            name: name.into(),
            url: url.trim_end_matches('/').to_owned(),
            runtime_kind: runtime_kind.into(),
            status: AtomicU8::new(EndpointStatus::Initializing as u8),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Language/runtime label, e.g. `"python"`. Informational.
    #[must_use]
    pub fn runtime_kind(&self) -> &str {
        &self.runtime_kind
    }

    #[must_use]
    pub fn status(&self) -> EndpointStatus {
        EndpointStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Stores a new status, returning the previous one.
    pub(crate) fn set_status(&self, status: EndpointStatus) -> EndpointStatus {
        EndpointStatus::from_u8(self.status.swap(status as u8, Ordering::SeqCst))
    }
}

/// Knobs for endpoint startup and monitoring.
#[derive(Clone, Debug)]
pub struct SupervisionConfig {
    /// Pause between inserting an endpoint and its first health probe,
    /// giving the worker process time to boot.
    pub startup_grace: Duration,
    /// Cadence of the background monitor's re-probes.
    pub health_interval: Duration,
    /// Probe attempts during registration, and upload attempts during
    /// component registration. Must be at least 1 for anything to succeed.
    pub max_retries: u32,
    /// Fixed pause between retry attempts.
    pub retry_delay: Duration,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(1),
            health_interval: Duration::from_secs(10),
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl SupervisionConfig {
    #[must_use]
    pub fn with_startup_grace(mut self, startup_grace: Duration) -> Self {
        self.startup_grace = startup_grace;
        self
    }

    #[must_use]
    pub fn with_health_interval(mut self, health_interval: Duration) -> Self {
        self.health_interval = health_interval;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Errors raised while supervising endpoints or talking to them.
#[derive(Debug, Error, Diagnostic)]
pub enum EndpointError {
    /// No endpoint is registered under the requested name.
    #[error("unknown endpoint: {name}")]
    #[diagnostic(
        code(steploom::endpoints::unknown),
        help("Register the endpoint before assigning steps to it.")
    )]
    UnknownEndpoint { name: String },

    /// A new endpoint never answered its startup health probes.
    #[error("endpoint {name} failed all {attempts} startup health probes")]
    #[diagnostic(
        code(steploom::endpoints::never_healthy),
        help("Check that the worker process is running and its /health route answers 2xx.")
    )]
    NeverHealthy { name: String, attempts: u32 },

    /// Component registration was attempted against a non-ready endpoint.
    #[error("endpoint {name} is not ready (status: {status})")]
    #[diagnostic(code(steploom::endpoints::not_ready))]
    NotReady {
        name: String,
        status: EndpointStatus,
    },

    /// Execution was requested while the endpoint is unhealthy; the event
    /// is dropped without any outbound request.
    #[error("endpoint {name} is unhealthy; event dropped")]
    #[diagnostic(code(steploom::endpoints::unavailable))]
    Unavailable { name: String },

    /// Execution was requested for a step no endpoint has loaded.
    #[error("no component registered for step {step_id}")]
    #[diagnostic(code(steploom::endpoints::unregistered))]
    Unregistered { step_id: StepId },

    /// The component source file could not be read.
    #[error("failed to read component source {path}")]
    #[diagnostic(code(steploom::endpoints::code_unreadable))]
    CodeUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Component upload kept failing through the whole retry budget.
    #[error("failed to upload component {step_id} to endpoint {name} after {attempts} attempts: {reason}")]
    #[diagnostic(code(steploom::endpoints::upload_failed))]
    UploadFailed {
        step_id: StepId,
        name: String,
        attempts: u32,
        reason: String,
    },

    /// The endpoint answered an execution request with a non-2xx status.
    #[error("endpoint returned {status} executing step {step_id}")]
    #[diagnostic(code(steploom::endpoints::execution_failed))]
    ExecutionFailed { step_id: StepId, status: u16 },

    /// Transport-level HTTP failure.
    #[error("endpoint request failed: {0}")]
    #[diagnostic(code(steploom::endpoints::http))]
    Http(#[from] reqwest::Error),
}
