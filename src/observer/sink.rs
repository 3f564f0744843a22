use std::io::{self, Result as IoResult};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::notice::FlowNotice;

/// Abstraction over an output target that consumes full notice objects.
pub trait ObserverSink: Sync + Send {
    /// Handle a structured notice. The sink decides how to render it.
    fn handle(&mut self, notice: &FlowNotice) -> IoResult<()>;
}

/// Default sink: renders notices as structured `tracing` log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ObserverSink for TracingSink {
    fn handle(&mut self, notice: &FlowNotice) -> IoResult<()> {
        match notice {
            FlowNotice::StepFailed { .. } => {
                tracing::warn!(target: "steploom::observer", kind = notice.kind(), "{notice}");
            }
            _ => {
                tracing::info!(target: "steploom::observer", kind = notice.kind(), "{notice}");
            }
        }
        Ok(())
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<FlowNotice>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured notices.
    pub fn snapshot(&self) -> Vec<FlowNotice> {
        self.entries.lock().unwrap().clone()
    }

    /// Clear all captured notices.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl ObserverSink for MemorySink {
    fn handle(&mut self, notice: &FlowNotice) -> IoResult<()> {
        self.entries.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Channel-based sink for streaming to async consumers (e.g. web clients).
///
/// Notices are forwarded to a tokio mpsc channel without blocking. Useful
/// for live dashboards and SSE endpoints.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FlowNotice>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<FlowNotice>) -> Self {
        Self { tx }
    }
}

impl ObserverSink for ChannelSink {
    fn handle(&mut self, notice: &FlowNotice) -> IoResult<()> {
        self.tx
            .send(notice.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
