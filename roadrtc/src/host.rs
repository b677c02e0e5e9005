//! Signaling host for webcam sessions
//!
//! Bridges browser connections on the signaling server to media sessions:
//! one session per connection, with its events and detection results
//! forwarded back over the same connection.

use crate::config::SessionConfig;
use crate::display::{run_display_loop, DetectionTable, ResultRenderer};
use crate::event::{EventStream, SessionEvent};
use crate::session::SessionHandle;
use crate::transport::TransportFactory;
use crate::{RoadRtc, RoadRtcError};
use async_trait::async_trait;
use dashmap::DashMap;
use roadrtc_core::SessionDescription;
use roadrtc_signaling::{ClientMessage, ConnectionHandle, ServerMessage, SessionHost};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// [`SessionHost`] running one detection session per browser connection
pub struct WebcamHost {
    roadrtc: RoadRtc,
    transports: Arc<dyn TransportFactory>,
    session_config: SessionConfig,
    sessions: DashMap<String, SessionHandle>,
    show_results: DashMap<String, bool>,
}

impl WebcamHost {
    /// Host creating sessions through `roadrtc` over `transports`
    pub fn new(roadrtc: RoadRtc, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            roadrtc,
            transports,
            session_config: SessionConfig::default(),
            sessions: DashMap::new(),
            show_results: DashMap::new(),
        }
    }

    /// Template for every session this host starts
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Session currently bound to `connection_id`
    pub fn session(&self, connection_id: &str) -> Option<SessionHandle> {
        self.sessions.get(connection_id).map(|entry| entry.value().clone())
    }

    /// Number of connections with a session
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn start_session(
        &self,
        connection: &ConnectionHandle,
        model: Option<String>,
        threshold: Option<f32>,
        offer: SessionDescription,
    ) -> Result<(), RoadRtcError> {
        if let Some((_, previous)) = self.sessions.remove(connection.id()) {
            info!(
                "Replacing session {} on connection {}",
                previous.id(),
                connection.id()
            );
            previous.stop();
        }

        let mut config = self.session_config.clone();
        if let Some(show) = self.show_results.get(connection.id()) {
            config.show_results = *show;
        }
        let display_poll = config.display_poll;

        let mut builder = self.roadrtc.session().config(config).remote_offer(offer);
        if let Some(model) = model {
            builder = builder.model(&model);
        }
        if let Some(threshold) = threshold {
            builder = builder.threshold(threshold);
        }

        // Relay or model failures end here, before any session exists
        let controller = builder.build().await?;
        let transport = self.transports.create(controller.id())?;

        let handle = controller.handle();
        tokio::spawn(forward_events(
            handle.subscribe_events(),
            connection.clone(),
            handle.id().to_string(),
        ));
        if let Some(results) = handle.take_results() {
            let renderer = SignalingRenderer {
                connection: connection.clone(),
                session_id: handle.id().to_string(),
            };
            tokio::spawn(run_display_loop(
                results,
                handle.state_reader(),
                handle.view().clone(),
                renderer,
                display_poll,
            ));
        }

        let handle = controller.start(transport);
        info!(
            "Started session {} for connection {}",
            handle.id(),
            connection.id()
        );
        self.sessions.insert(connection.id().to_string(), handle);
        Ok(())
    }

    fn bound_session(&self, connection: &ConnectionHandle) -> Result<SessionHandle, RoadRtcError> {
        self.session(connection.id())
            .ok_or_else(|| RoadRtcError::SessionNotFound {
                session_id: connection.id().to_string(),
            })
    }
}

#[async_trait]
impl SessionHost for WebcamHost {
    async fn handle_message(
        &self,
        connection: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<(), RoadRtcError> {
        match message {
            ClientMessage::Start {
                model,
                threshold,
                offer,
            } => self.start_session(connection, model, threshold, offer).await,
            ClientMessage::SetThreshold { threshold } => {
                self.bound_session(connection)?.set_threshold(threshold)?;
                Ok(())
            }
            ClientMessage::ShowResults { show } => {
                self.show_results.insert(connection.id().to_string(), show);
                if let Some(session) = self.session(connection.id()) {
                    session.view().set_show_results(show);
                }
                Ok(())
            }
            ClientMessage::Stop => {
                match self.session(connection.id()) {
                    Some(session) => session.stop(),
                    None => debug!("Stop on connection {} without a session", connection.id()),
                }
                Ok(())
            }
            ClientMessage::ListModels => {
                let models = self.roadrtc.available_models()?;
                if connection.send(ServerMessage::Models { models }).is_err() {
                    debug!("Connection {} gone before model list", connection.id());
                }
                Ok(())
            }
        }
    }

    async fn connection_closed(&self, connection_id: &str) {
        self.show_results.remove(connection_id);
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            info!(
                "Connection {} closed, stopping session {}",
                connection_id,
                session.id()
            );
            session.stop();
        }
    }
}

impl std::fmt::Debug for WebcamHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebcamHost")
            .field("roadrtc", &self.roadrtc)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Push session events to the browser until the session ends
async fn forward_events(mut events: EventStream, connection: ConnectionHandle, session_id: String) {
    while let Some(event) = events.next().await {
        let (message, done) = match event {
            SessionEvent::StateChanged { to, .. } => (
                Some(ServerMessage::State {
                    session_id: session_id.clone(),
                    state: to,
                }),
                to.is_terminal(),
            ),
            SessionEvent::LocalDescription { description } => (
                Some(ServerMessage::Answer {
                    session_id: session_id.clone(),
                    answer: description,
                }),
                false,
            ),
            SessionEvent::Error { error, error_code } => {
                (Some(ServerMessage::Error { error, error_code }), false)
            }
            SessionEvent::FrameFailed { sequence, reason } => {
                debug!("Session {} frame {} failed: {}", session_id, sequence, reason);
                (None, false)
            }
        };

        if let Some(message) = message {
            if connection.send(message).is_err() {
                warn!("Connection {} closed, dropping session events", connection.id());
                break;
            }
        }
        if done {
            break;
        }
    }
}

/// Sends rendered tables to the browser as `Results` messages
struct SignalingRenderer {
    connection: ConnectionHandle,
    session_id: String,
}

#[async_trait]
impl ResultRenderer for SignalingRenderer {
    async fn render(&mut self, table: DetectionTable) -> Result<(), RoadRtcError> {
        self.connection
            .send(ServerMessage::Results {
                session_id: self.session_id.clone(),
                sequence: table.sequence,
                rows: table.rows,
            })
            .map_err(|e| RoadRtcError::Transport {
                reason: e.to_string(),
            })
    }
}
