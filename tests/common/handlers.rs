#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use steploom::bus::{BoxError, EventHandler};
use steploom::event::FlowEvent;
use steploom::executor::{StepContext, StepError, StepHandler};

/// Bus handler that remembers every event it saw.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<FlowEvent>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn topics(&self) -> Vec<String> {
        self.seen.lock().iter().map(|e| e.topic.clone()).collect()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: Arc<FlowEvent>) -> Result<(), BoxError> {
        self.seen.lock().push((*event).clone());
        Ok(())
    }
}

/// Bus handler that always fails.
pub struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _event: Arc<FlowEvent>) -> Result<(), BoxError> {
        Err("synthetic handler failure".into())
    }
}

/// Step handler that counts its runs.
#[derive(Clone, Default)]
pub struct CountingStep {
    runs: Arc<AtomicUsize>,
}

impl CountingStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for CountingStep {
    async fn run(&self, _data: Value, _ctx: StepContext) -> Result<(), StepError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Step handler that re-emits its payload on a fixed topic.
pub struct RelayStep {
    pub next_topic: &'static str,
}

#[async_trait]
impl StepHandler for RelayStep {
    async fn run(&self, data: Value, ctx: StepContext) -> Result<(), StepError> {
        ctx.emit(self.next_topic, data).await?;
        Ok(())
    }
}

/// Step handler that records which trace each run belonged to.
#[derive(Clone, Default)]
pub struct TraceProbeStep {
    traces: Arc<Mutex<Vec<String>>>,
}

impl TraceProbeStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<String> {
        self.traces.lock().clone()
    }
}

#[async_trait]
impl StepHandler for TraceProbeStep {
    async fn run(&self, _data: Value, ctx: StepContext) -> Result<(), StepError> {
        self.traces.lock().push(ctx.trace_id.clone());
        Ok(())
    }
}
