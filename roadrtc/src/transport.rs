//! Media transport boundary
//!
//! Packet-level media (ICE, DTLS, SRTP, codecs) lives behind [`MediaTransport`].
//! Browsers connect through the WebRTC transport in `peer`; the in-process
//! [`LoopbackTransport`] stands in for a browser in tests and demos.

use crate::RoadRtcError;
use async_trait::async_trait;
use dashmap::DashMap;
use roadrtc_core::{IceConfiguration, SessionDescription};
use roadrtc_media::VideoFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One negotiated peer media connection
#[async_trait]
pub trait MediaTransport: Send + 'static {
    /// Establish the connection.
    ///
    /// Returns the local answer when a remote offer was supplied.
    async fn negotiate(
        &mut self,
        ice: &IceConfiguration,
        remote_offer: Option<SessionDescription>,
    ) -> Result<Option<SessionDescription>, RoadRtcError>;

    /// Next decoded inbound frame; `None` when the remote stream ended
    async fn recv_frame(&mut self) -> Result<Option<VideoFrame>, RoadRtcError>;

    /// Send a frame back to the peer
    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), RoadRtcError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Creates a transport for each new session
pub trait TransportFactory: Send + Sync {
    /// Transport for session `session_id`
    fn create(&self, session_id: &str) -> Result<Box<dyn MediaTransport>, RoadRtcError>;
}

/// Loopback behaviour knobs
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Time negotiation takes
    pub negotiation_delay: Duration,
    /// Make negotiation fail with this reason
    pub negotiation_failure: Option<String>,
    /// Fail `send_frame` after this many frames were sent
    pub fail_after_frames: Option<u64>,
}

/// Frame buffer depth in each direction
const LOOPBACK_DEPTH: usize = 16;

/// Server side of an in-process peer connection
#[derive(Debug)]
pub struct LoopbackTransport {
    config: LoopbackConfig,
    inbound: mpsc::Receiver<VideoFrame>,
    outbound: mpsc::Sender<VideoFrame>,
    sent: u64,
    closed: bool,
    registration: Option<Registration>,
}

/// Unclaimed peers of a [`LoopbackFactory`], keyed by session ID
type PeerRegistry = Arc<DashMap<String, LoopbackPeer>>;

/// Entry a factory-made transport removes from its factory on close
#[derive(Debug)]
struct Registration {
    peers: PeerRegistry,
    session_id: String,
}

/// Browser side of a loopback connection
#[derive(Debug)]
pub struct LoopbackPeer {
    to_server: Option<mpsc::Sender<VideoFrame>>,
    from_server: mpsc::Receiver<VideoFrame>,
}

impl LoopbackTransport {
    /// Connected transport/peer pair
    pub fn pair(config: LoopbackConfig) -> (LoopbackTransport, LoopbackPeer) {
        let (to_server, inbound) = mpsc::channel(LOOPBACK_DEPTH);
        let (outbound, from_server) = mpsc::channel(LOOPBACK_DEPTH);
        (
            LoopbackTransport {
                config,
                inbound,
                outbound,
                sent: 0,
                closed: false,
                registration: None,
            },
            LoopbackPeer {
                to_server: Some(to_server),
                from_server,
            },
        )
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn negotiate(
        &mut self,
        ice: &IceConfiguration,
        remote_offer: Option<SessionDescription>,
    ) -> Result<Option<SessionDescription>, RoadRtcError> {
        if !self.config.negotiation_delay.is_zero() {
            tokio::time::sleep(self.config.negotiation_delay).await;
        }
        if let Some(reason) = &self.config.negotiation_failure {
            return Err(RoadRtcError::Negotiation {
                reason: reason.clone(),
            });
        }

        let relays: Vec<&str> = ice.urls().collect();
        debug!("Loopback negotiated via {:?}", relays);
        Ok(remote_offer.map(|offer| {
            SessionDescription::answer(format!(
                "loopback-answer;relays={};offer-bytes={}",
                relays.join(","),
                offer.sdp.len()
            ))
        }))
    }

    async fn recv_frame(&mut self) -> Result<Option<VideoFrame>, RoadRtcError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), RoadRtcError> {
        if let Some(limit) = self.config.fail_after_frames {
            if self.sent >= limit {
                return Err(RoadRtcError::Transport {
                    reason: format!("loopback link dropped after {} frames", limit),
                });
            }
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RoadRtcError::Transport {
                reason: "loopback peer went away".to_string(),
            })?;
        self.sent += 1;
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.inbound.close();
        if let Some(registration) = self.registration.take() {
            if registration.peers.remove(&registration.session_id).is_some() {
                debug!("Dropped unclaimed peer of session {}", registration.session_id);
            }
        }
    }
}

impl LoopbackPeer {
    /// Push a frame towards the server; false once the server side is closed
    pub async fn send_frame(&self, frame: VideoFrame) -> bool {
        match &self.to_server {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Next processed frame from the server
    pub async fn recv_frame(&mut self) -> Option<VideoFrame> {
        self.from_server.recv().await
    }

    /// End the inbound stream, as a browser closing its camera would
    pub fn end_stream(&mut self) {
        self.to_server = None;
    }
}

/// Factory handing out loopback transports and keeping their peers.
///
/// A peer stays claimable until its session's transport closes.
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    config: LoopbackConfig,
    peers: PeerRegistry,
}

impl LoopbackFactory {
    /// Factory whose transports use `config`
    pub fn new(config: LoopbackConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: Arc::new(DashMap::new()),
        })
    }

    /// Take the peer side of session `session_id`
    pub fn take_peer(&self, session_id: &str) -> Option<LoopbackPeer> {
        self.peers.remove(session_id).map(|(_, peer)| peer)
    }

    /// Peers created but not yet taken
    pub fn unclaimed_peers(&self) -> usize {
        self.peers.len()
    }
}

impl TransportFactory for LoopbackFactory {
    fn create(&self, session_id: &str) -> Result<Box<dyn MediaTransport>, RoadRtcError> {
        let (mut transport, peer) = LoopbackTransport::pair(self.config.clone());
        self.peers.insert(session_id.to_string(), peer);
        transport.registration = Some(Registration {
            peers: self.peers.clone(),
            session_id: session_id.to_string(),
        });
        Ok(Box::new(transport))
    }
}
