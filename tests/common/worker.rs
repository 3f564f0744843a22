#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use steploom::endpoints::SupervisionConfig;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Supervision tuned so tests finish fast: no boot grace, tiny retry delay,
/// and a monitor interval long enough that only explicit probes run.
pub fn fast_supervision() -> SupervisionConfig {
    SupervisionConfig::default()
        .with_startup_grace(Duration::ZERO)
        .with_health_interval(Duration::from_secs(600))
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(5))
}

/// Writes step source to a temp file for component uploads.
pub fn code_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Counters and switches backing a fake worker endpoint.
///
/// Speaks the worker protocol: `GET /health`, `POST /register`,
/// `POST /execute/:step_id`.
pub struct WorkerControl {
    health_calls: AtomicUsize,
    register_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    healthy: AtomicBool,
    execute_fails: AtomicBool,
    register_failures_left: AtomicUsize,
    uploaded: Mutex<Vec<String>>,
    response_events: Mutex<Value>,
    last_execute: Mutex<Option<(String, Value)>>,
}

impl WorkerControl {
    /// A worker that starts healthy, accepts uploads, and answers executes
    /// with no events.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            health_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            execute_fails: AtomicBool::new(false),
            register_failures_left: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
            response_events: Mutex::new(json!([])),
            last_execute: Mutex::new(None),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_executes(&self, fail: bool) {
        self.execute_fails.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `n` register calls answer 500.
    pub fn fail_next_registrations(&self, n: usize) {
        self.register_failures_left.store(n, Ordering::SeqCst);
    }

    /// Events the worker answers `POST /execute` with.
    pub fn respond_with_events(&self, events: Value) {
        *self.response_events.lock() = events;
    }

    pub fn health_count(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploaded.lock().clone()
    }

    pub fn last_execute(&self) -> Option<(String, Value)> {
        self.last_execute.lock().clone()
    }
}

async fn health(State(control): State<Arc<WorkerControl>>) -> StatusCode {
    control.health_calls.fetch_add(1, Ordering::SeqCst);
    if control.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn register(
    State(control): State<Arc<WorkerControl>>,
    Json(body): Json<Value>,
) -> StatusCode {
    control.register_calls.fetch_add(1, Ordering::SeqCst);
    if control.register_failures_left.load(Ordering::SeqCst) > 0 {
        control.register_failures_left.fetch_sub(1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if let Some(name) = body["name"].as_str() {
        control.uploaded.lock().push(name.to_owned());
    }
    StatusCode::OK
}

async fn execute(
    State(control): State<Arc<WorkerControl>>,
    Path(step_id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    control.execute_calls.fetch_add(1, Ordering::SeqCst);
    *control.last_execute.lock() = Some((step_id, body));
    if control.execute_fails.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }
    let events = control.response_events.lock().clone();
    (StatusCode::OK, Json(json!({ "events": events })))
}

/// Binds a fake worker on an ephemeral port, returning its base url and the
/// server task handle.
pub async fn spawn_worker(control: Arc<WorkerControl>) -> (String, JoinHandle<()>) {
    let router = Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/execute/:step_id", post(execute))
        .with_state(control);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router.into_make_service()).await {
            tracing::error!("fake worker server error: {err:?}");
        }
    });
    (format!("http://{addr}"), server)
}
