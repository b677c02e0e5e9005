//! Session lifecycle state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle state of one media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Signaling / ICE handshake in progress
    Negotiating,
    /// Handshake complete, no media exchanged yet
    Connected,
    /// Frames are flowing through the pipeline
    Playing,
    /// Ended by the user or the remote peer
    Stopped,
    /// Ended by a negotiation or transport error
    Failed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// Beyond the main lifecycle path, a session that is torn down before its
    /// first frame goes straight to `Stopped` (or `Failed` if the transport
    /// dropped while connected).
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Failed)
                | (Negotiating, Stopped)
                | (Connected, Playing)
                | (Connected, Stopped)
                | (Connected, Failed)
                | (Playing, Stopped)
                | (Playing, Failed)
        )
    }

    /// Stopped or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Negotiating, Connected or Playing
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Negotiating | SessionState::Connected | SessionState::Playing
        )
    }

    /// Lowercase name used in logs and on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Playing => "playing",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sole writer of a session's state.
///
/// Owned by the session controller; everyone else holds a [`StateReader`].
#[derive(Debug)]
pub struct StateWriter {
    tx: watch::Sender<SessionState>,
}

/// Read-only view of a session's state
#[derive(Debug, Clone)]
pub struct StateReader {
    rx: watch::Receiver<SessionState>,
}

/// Create a writer/reader pair starting at [`SessionState::Idle`]
pub fn state_channel() -> (StateWriter, StateReader) {
    let (tx, rx) = watch::channel(SessionState::Idle);
    (StateWriter { tx }, StateReader { rx })
}

impl StateWriter {
    /// Current state
    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Move to `next` if the edge is legal.
    ///
    /// Returns the previous state on success. Illegal edges leave the state
    /// untouched.
    pub fn transition(&self, next: SessionState) -> Option<SessionState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(from) => debug!("Session state {} -> {}", from, next),
            None => warn!(
                "Rejected session state transition {} -> {}",
                self.current(),
                next
            ),
        }
        previous
    }

    /// Create another reader
    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl StateReader {
    /// Current state, never blocks
    pub fn current(&self) -> SessionState {
        *self.rx.borrow()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns the matching state, or the last known state if the writer was
    /// dropped first.
    pub async fn wait_until<F>(&mut self, mut predicate: F) -> SessionState
    where
        F: FnMut(SessionState) -> bool,
    {
        loop {
            let state = *self.rx.borrow_and_update();
            if predicate(state) {
                return state;
            }
            if self.rx.changed().await.is_err() {
                return *self.rx.borrow();
            }
        }
    }

    /// Wait for the next change; `None` once the writer is gone
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 6] = [Idle, Negotiating, Connected, Playing, Stopped, Failed];

    #[test]
    fn test_lifecycle_edges() {
        assert!(Idle.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Connected));
        assert!(Negotiating.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Stopped));
        assert!(Playing.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Playing));
        assert!(!Idle.can_transition_to(Stopped));
        assert!(!Playing.can_transition_to(Connected));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for next in ALL {
            assert!(!Stopped.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_writer_rejects_illegal_edges() {
        let (writer, reader) = state_channel();
        assert_eq!(reader.current(), Idle);

        assert_eq!(writer.transition(Playing), None);
        assert_eq!(reader.current(), Idle);

        assert_eq!(writer.transition(Negotiating), Some(Idle));
        assert_eq!(writer.transition(Connected), Some(Negotiating));
        assert_eq!(reader.current(), Connected);
    }

    #[tokio::test]
    async fn test_reader_waits_for_terminal_state() {
        let (writer, mut reader) = state_channel();

        let waiter = tokio::spawn(async move { reader.wait_until(SessionState::is_terminal).await });

        writer.transition(Negotiating);
        writer.transition(Failed);

        assert_eq!(waiter.await.unwrap(), Failed);
    }

    #[test]
    fn test_reader_sees_writer_gone() {
        let (writer, mut reader) = state_channel();
        writer.transition(Negotiating);
        assert_eq!(tokio_test::block_on(reader.changed()), Some(Negotiating));

        drop(writer);
        assert_eq!(tokio_test::block_on(reader.changed()), None);
        assert_eq!(reader.current(), Negotiating);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&Playing).unwrap();
        assert_eq!(json, "\"playing\"");
        let state: SessionState = serde_json::from_str("\"negotiating\"").unwrap();
        assert_eq!(state, Negotiating);
    }
}
