//! Session events

use roadrtc_core::{SessionDescription, SessionState};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Events emitted over the lifetime of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    /// The session moved between states
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Local SDP answer produced by negotiation
    LocalDescription {
        /// Answer to send to the browser
        description: SessionDescription,
    },
    /// A frame went out unannotated because detection failed
    FrameFailed {
        /// Frame sequence number
        sequence: u64,
        /// Failure description
        reason: String,
    },
    /// The session hit an error that ended it
    Error {
        /// Error message
        error: String,
        /// Error code for programmatic handling
        error_code: String,
    },
}

/// Stream of session events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<SessionEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event; `None` once the session is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event subscriber lagged, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
