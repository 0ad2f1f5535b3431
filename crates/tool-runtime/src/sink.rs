use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::stream::{ErrorReason, StreamEvent};

/// The single writer side of a run's event channel.
///
/// Guarantees at most one terminal event (`done` or `error`): once one has
/// been sent, later events are dropped with a warning.
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    terminated: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event receiver dropped")]
pub struct ReceiverGone;

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            terminated: AtomicBool::new(false),
        }
    }

    /// Send one event, waiting for channel capacity.
    pub async fn send(&self, event: StreamEvent) -> Result<(), ReceiverGone> {
        if self.terminated.load(Ordering::Acquire) {
            warn!(kind = event.kind(), "Event after terminal event dropped");
            return Ok(());
        }
        if event.is_terminal() && self.terminated.swap(true, Ordering::AcqRel) {
            warn!(kind = event.kind(), "Second terminal event dropped");
            return Ok(());
        }
        self.tx.send(event).await.map_err(|_| ReceiverGone)
    }

    pub async fn fail(&self, reason: ErrorReason, message: impl Into<String>) -> Result<(), ReceiverGone> {
        self.send(StreamEvent::error(reason, message)).await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
