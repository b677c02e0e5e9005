//! Signaling server implementation

use crate::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use roadrtc_core::RoadRtcError;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Returned when a message is sent to a connection that has gone away
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connection {connection_id} is closed")]
pub struct ConnectionClosed {
    /// Connection the message was meant for
    pub connection_id: String,
}

/// Outbound side of one browser connection.
///
/// Cheap to clone; hosts keep clones to push state and results
/// asynchronously.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its messages arrive on
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: id.into(),
                outbound,
            },
            rx,
        )
    }

    /// Connection ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for the browser
    pub fn send(&self, message: ServerMessage) -> Result<(), ConnectionClosed> {
        self.outbound.send(message).map_err(|_| ConnectionClosed {
            connection_id: self.id.clone(),
        })
    }

    /// Queue an error response
    pub fn send_error(&self, err: &RoadRtcError) -> Result<(), ConnectionClosed> {
        self.send(ServerMessage::error(err))
    }

    /// Whether the browser side is gone
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Receives the control messages of every connection
#[async_trait]
pub trait SessionHost: Send + Sync + 'static {
    /// Handle one parsed message. An error is reported back to the sender as
    /// an `Error` message; the connection stays open.
    async fn handle_message(
        &self,
        connection: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<(), RoadRtcError>;

    /// The connection is gone; tear down anything it owned
    async fn connection_closed(&self, connection_id: &str);
}

/// WebSocket signaling server
#[derive(Clone)]
pub struct SignalingServer {
    /// Address the server binds to
    pub bind_addr: SocketAddr,
    host: Arc<dyn SessionHost>,
    connections: Arc<DashMap<String, ConnectionHandle>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SignalingServer {
    /// Create new signaling server
    pub fn new(bind_addr: SocketAddr, host: Arc<dyn SessionHost>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bind_addr,
            host,
            connections: Arc::new(DashMap::new()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Bind and serve until [`SignalingServer::stop`] is called
    pub async fn start(&self) -> Result<(), RoadRtcError> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            RoadRtcError::ServerStartFailed {
                address: self.bind_addr,
                source: e.into(),
            }
        })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RoadRtcError> {
        let local_addr = listener.local_addr().unwrap_or(self.bind_addr);
        tracing::info!("Signaling server listening on {}", local_addr);

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("New connection from {}", addr);
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                _ = async { shutdown.wait_for(|stopped| *stopped).await.is_ok() } => break,
            }
        }

        tracing::info!("Signaling server on {} stopped", local_addr);
        Ok(())
    }

    /// Handle incoming WebSocket connection
    async fn handle_connection(&self, stream: TcpStream) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let connection_id = Uuid::new_v4().to_string();
        tracing::debug!("WebSocket connection established: {}", connection_id);

        let (mut sink, mut incoming) = ws_stream.split();
        let (handle, mut outbound) = ConnectionHandle::new(connection_id.clone());
        self.connections.insert(connection_id.clone(), handle.clone());

        let writer_id = connection_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize response: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::error!("Failed to send message to {}: {}", writer_id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = incoming.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(&handle, text).await,
                Ok(Message::Close(_)) => {
                    tracing::debug!("Connection {} closed", connection_id);
                    break;
                }
                Err(e) => {
                    tracing::error!("WebSocket error on connection {}: {}", connection_id, e);
                    break;
                }
                // Ping/pong is answered by tungstenite; binary frames are not part
                // of the protocol
                Ok(_) => {}
            }
        }

        self.cleanup_connection(&connection_id).await;
        writer.abort();
    }

    /// Parse and dispatch one text frame
    async fn handle_text(&self, handle: &ConnectionHandle, text: String) {
        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Invalid message format: {}", e);
                let _ = handle.send_error(&RoadRtcError::InvalidMessage {
                    message: text,
                    source: e.into(),
                });
                return;
            }
        };

        tracing::debug!("Connection {} sent {:?}", handle.id(), message);
        if let Err(e) = self.host.handle_message(handle, message).await {
            tracing::warn!("Failed to handle message from {}: {}", handle.id(), e);
            let _ = handle.send_error(&e);
        }
    }

    /// Cleanup connection and the session it owned
    async fn cleanup_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.host.connection_closed(connection_id).await;
    }

    /// Stop accepting connections
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        tracing::info!("Signaling server stopping");
    }

    /// Number of open browser connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for SignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingServer")
            .field("bind_addr", &self.bind_addr)
            .field("connections", &self.connections.len())
            .finish()
    }
}
