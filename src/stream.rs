//! Status streaming for in-flight procedures.
//!
//! Query, mutation, and form-mutation handlers receive a [`StreamEmitter`]
//! and may push zero or more [`StatusEvent`]s before returning. Events are
//! delivered in emission order ahead of the terminal value. The emitter is
//! only live for the handler's execution window: once the handler returns,
//! the dispatch layer closes it and any further `emit` returns
//! [`EmitError::Closed`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// An intermediate status event pushed during a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Event name, e.g. `"messageSent"`
    pub event: String,
    /// Optional event payload
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
    /// Optional progress in `0.0..=1.0`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<f32>,
    /// Optional human-readable status line
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
}

impl StatusEvent {
    /// Create a bare event with just a name.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: None,
            progress: None,
            status: None,
        }
    }

    /// Attach a payload to the event.
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }

    /// Attach a progress fraction to the event.
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach a status line to the event.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Error returned by [`StreamEmitter::emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EmitError {
    /// The handler has returned or the connection has closed.
    #[error("stream emitter is closed")]
    Closed,
}

/// Send-only handle for pushing status events during one invocation.
///
/// There is exactly one writer per invocation (the handler task), so no
/// locking happens beyond the channel itself. Cloning is cheap; clones
/// share the closed state.
#[derive(Clone)]
pub struct StreamEmitter {
    tx: mpsc::Sender<StatusEvent>,
    closed: Arc<AtomicBool>,
}

impl StreamEmitter {
    /// Push an event onto the invocation's outgoing sequence.
    ///
    /// Returns [`EmitError::Closed`] once the handler has returned or the
    /// receiving connection has gone away. Delivery is in-order for the
    /// lifetime of the connection; there is no replay after disconnect.
    pub async fn emit(&self, event: StatusEvent) -> Result<(), EmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EmitError::Closed);
        }
        self.tx.send(event).await.map_err(|_| EmitError::Closed)
    }

    /// Whether the emitter has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the emitter closed. Called by the dispatch layer when the
    /// handler returns; idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Receiving half of a status channel.
pub type StatusReceiver = mpsc::Receiver<StatusEvent>;

/// Create a status channel for one invocation.
pub fn status_channel(buffer: usize) -> (StreamEmitter, StatusReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        StreamEmitter {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}
