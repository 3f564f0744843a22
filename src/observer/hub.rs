use std::sync::{Arc, Mutex};

use tokio::{sync::oneshot, task};

use super::notice::FlowNotice;
use super::sink::{ObserverSink, TracingSink};

/// ObserverHub receives notices from runtime subsystems and broadcasts them
/// to multiple sinks on a background task.
pub struct ObserverHub {
    sinks: Arc<Mutex<Vec<Box<dyn ObserverSink>>>>,
    notice_channel: (flume::Sender<FlowNotice>, flume::Receiver<FlowNotice>),
    listener: Arc<Mutex<Option<ListenerState>>>,
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::with_sink(TracingSink)
    }
}

impl ObserverHub {
    /// Create a hub with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: ObserverSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create a hub with multiple sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn ObserverSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            notice_channel: flume::unbounded(),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Dynamically add a sink (useful for per-request streaming).
    pub fn add_sink<T: ObserverSink + 'static>(&self, sink: T) {
        self.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Handle producers use to push notices into the hub.
    pub fn publisher(&self) -> NoticePublisher {
        NoticePublisher {
            tx: Some(self.notice_channel.0.clone()),
        }
    }

    /// Spawn a background task that drains notices and broadcasts to all
    /// sinks. Idempotent: calling multiple times has no effect.
    pub fn listen(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return; // Already listening
        }

        let receiver = self.notice_channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(notice) => {
                            let mut sinks_guard = sinks.lock().expect("sinks poisoned");
                            for sink in sinks_guard.iter_mut() {
                                if let Err(error) = sink.handle(&notice) {
                                    tracing::warn!(%error, "observer sink error");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background listener task, draining nothing further.
    pub async fn stop(&self) {
        let state = {
            let mut guard = self.listener.lock().expect("listener poisoned");
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for ObserverHub {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Cloneable handle for pushing notices into an [`ObserverHub`].
///
/// Sending is best-effort: when the hub is gone the notice is dropped, never
/// surfaced as an error to the caller.
#[derive(Clone, Debug)]
pub struct NoticePublisher {
    tx: Option<flume::Sender<FlowNotice>>,
}

impl NoticePublisher {
    /// Publisher that discards every notice. Handy for standalone subsystem
    /// use where nobody is watching.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, notice: FlowNotice) {
        if let Some(tx) = &self.tx
            && tx.send(notice).is_err()
        {
            tracing::debug!("observer hub closed; dropping notice");
        }
    }
}
