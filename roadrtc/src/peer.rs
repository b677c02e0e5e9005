//! Browser media transport over WebRTC
//!
//! Answers the browser's offer with a send/receive H.264 video connection.
//! Inbound RTP is reassembled into access units and decoded on a dedicated
//! codec thread; annotated frames are encoded on another and written back as
//! samples on the local track.

use crate::transport::{MediaTransport, TransportFactory};
use crate::RoadRtcError;
use async_trait::async_trait;
use bytes::Bytes;
use roadrtc_core::{IceConfiguration, SdpType, SessionDescription};
use roadrtc_media::{H264Decoder, H264Encoder, MediaError, MediaResult, VideoFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packetizer::Depacketizer;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// RTP clock rate of video payloads
const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Dynamic payload type offered for H.264
const H264_PAYLOAD_TYPE: u8 = 102;

/// WebRTC transport configuration
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// Media stream ID of the annotated video track
    pub stream_id: String,
    /// Longest wait for local ICE candidates before answering
    pub gather_timeout: Duration,
    /// Sample duration when frame timestamps do not advance
    pub frame_interval: Duration,
    /// Decoded frames buffered ahead of the session; later frames are dropped
    pub inbound_depth: usize,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stream_id: "roadrtc".to_string(),
            gather_timeout: Duration::from_secs(5),
            frame_interval: Duration::from_millis(33),
            inbound_depth: 2,
        }
    }
}

/// Why the inbound side stopped delivering frames
#[derive(Debug)]
enum LinkEvent {
    Ended,
    Failed(String),
}

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_owned(),
        rtcp_feedback: vec![],
    }
}

/// WebRTC API that only negotiates H.264 video
pub(crate) fn build_api() -> Result<API, webrtc::Error> {
    let mut media = MediaEngine::default();
    media.register_codec(
        RTCRtpCodecParameters {
            capability: h264_capability(),
            payload_type: H264_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}

/// Peer connection configuration using the session's relays
pub(crate) fn rtc_configuration(ice: &IceConfiguration) -> RTCConfiguration {
    let urls: Vec<String> = ice.urls().map(str::to_string).collect();
    let ice_servers = if urls.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls,
            ..Default::default()
        }]
    };
    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn negotiation_error(err: webrtc::Error) -> RoadRtcError {
    RoadRtcError::Negotiation {
        reason: err.to_string(),
    }
}

/// One browser peer connection
pub struct WebRtcTransport {
    config: WebRtcConfig,
    peer: Option<Arc<RTCPeerConnection>>,
    outbound: Arc<TrackLocalStaticSample>,
    encoder: Option<EncoderWorker>,
    frames: mpsc::Receiver<VideoFrame>,
    link: mpsc::UnboundedReceiver<LinkEvent>,
    // Handed to the connection's callbacks during negotiation
    senders: Option<(mpsc::Sender<VideoFrame>, mpsc::UnboundedSender<LinkEvent>)>,
    last_timestamp: Option<u64>,
}

impl WebRtcTransport {
    /// Unnegotiated transport; `negotiate` answers the browser's offer
    pub fn new(config: WebRtcConfig) -> Self {
        let (frames_tx, frames) = mpsc::channel(config.inbound_depth.max(1));
        let (link_tx, link) = mpsc::unbounded_channel();
        let outbound = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_owned(),
            config.stream_id.clone(),
        ));
        Self {
            config,
            peer: None,
            outbound,
            encoder: None,
            frames,
            link,
            senders: Some((frames_tx, link_tx)),
            last_timestamp: None,
        }
    }

    fn sample_duration(&mut self, timestamp: u64) -> Duration {
        let duration = match self.last_timestamp {
            Some(previous) if timestamp > previous => Duration::from_millis(timestamp - previous),
            _ => self.config.frame_interval,
        };
        self.last_timestamp = Some(timestamp);
        duration
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn negotiate(
        &mut self,
        ice: &IceConfiguration,
        remote_offer: Option<SessionDescription>,
    ) -> Result<Option<SessionDescription>, RoadRtcError> {
        let offer = match remote_offer {
            Some(offer) if offer.sdp_type == SdpType::Offer => offer,
            _ => {
                return Err(RoadRtcError::Negotiation {
                    reason: "a browser offer is required".to_string(),
                })
            }
        };
        let (frames_tx, link_tx) = self.senders.take().ok_or_else(|| RoadRtcError::Negotiation {
            reason: "transport already negotiated".to_string(),
        })?;

        let api = build_api().map_err(negotiation_error)?;
        let peer = Arc::new(
            api.new_peer_connection(rtc_configuration(ice))
                .await
                .map_err(negotiation_error)?,
        );
        self.peer = Some(peer.clone());

        let rtp_sender = peer
            .add_track(self.outbound.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(negotiation_error)?;
        // Interceptors only see browser RTCP if someone reads it
        tokio::spawn(async move {
            let mut rtcp = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp).await.is_ok() {}
        });

        let track_link = link_tx.clone();
        peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            let frames = frames_tx.clone();
            let link = track_link.clone();
            Box::pin(async move {
                tokio::spawn(read_remote_track(track, frames, link));
            })
        }));

        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection {}", state);
            let event = match state {
                RTCPeerConnectionState::Failed => {
                    Some(LinkEvent::Failed("peer connection failed".to_string()))
                }
                RTCPeerConnectionState::Closed => Some(LinkEvent::Ended),
                _ => None,
            };
            if let Some(event) = event {
                // The session may already be gone
                let _ = link_tx.send(event);
            }
            Box::pin(async {})
        }));

        peer.set_remote_description(
            RTCSessionDescription::offer(offer.sdp).map_err(negotiation_error)?,
        )
        .await
        .map_err(negotiation_error)?;
        let answer = peer.create_answer(None).await.map_err(negotiation_error)?;
        let mut gathered = peer.gathering_complete_promise().await;
        peer.set_local_description(answer)
            .await
            .map_err(negotiation_error)?;
        if tokio::time::timeout(self.config.gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering incomplete after {:?}, answering with the candidates found",
                self.config.gather_timeout
            );
        }

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| RoadRtcError::Negotiation {
                reason: "no local description after answering".to_string(),
            })?;
        self.encoder = Some(EncoderWorker::spawn()?);
        info!("Answered browser offer via {} relay URL(s)", ice.urls().count());
        Ok(Some(SessionDescription::answer(local.sdp)))
    }

    async fn recv_frame(&mut self) -> Result<Option<VideoFrame>, RoadRtcError> {
        tokio::select! {
            biased;
            frame = self.frames.recv() => Ok(frame),
            event = self.link.recv() => match event {
                Some(LinkEvent::Failed(reason)) => Err(RoadRtcError::Transport { reason }),
                Some(LinkEvent::Ended) | None => Ok(None),
            },
        }
    }

    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), RoadRtcError> {
        let duration = self.sample_duration(frame.timestamp);
        let pending = self
            .encoder
            .as_ref()
            .ok_or_else(|| RoadRtcError::Transport {
                reason: "send before negotiation".to_string(),
            })?
            .submit(frame)?;
        let encoded = pending.await.map_err(|_| RoadRtcError::Transport {
            reason: "H.264 encoder stopped".to_string(),
        })??;

        self.outbound
            .write_sample(&Sample {
                data: Bytes::from(encoded),
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| RoadRtcError::Transport {
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        self.encoder = None;
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Closing peer connection: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("config", &self.config)
            .field("negotiated", &self.peer.is_some())
            .finish()
    }
}

/// Reassemble one remote video track into access units for the decoder
async fn read_remote_track(
    track: Arc<TrackRemote>,
    frames: mpsc::Sender<VideoFrame>,
    link: mpsc::UnboundedSender<LinkEvent>,
) {
    let (units, pending) = std::sync::mpsc::channel::<(Vec<u8>, u64)>();
    let decoder_link = link.clone();
    let spawned = std::thread::Builder::new()
        .name("roadrtc-h264-decode".to_string())
        .spawn(move || decode_loop(pending, frames, decoder_link));
    if let Err(e) = spawned {
        let _ = link.send(LinkEvent::Failed(format!("decoder thread: {}", e)));
        return;
    }

    let mut depacketizer = H264Packet::default();
    let mut access_unit = Vec::new();
    let mut first_timestamp = None;
    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                debug!("Remote track ended: {}", e);
                break;
            }
        };
        match depacketizer.depacketize(&packet.payload) {
            Ok(nal) => access_unit.extend_from_slice(&nal),
            Err(e) => debug!("Dropping RTP payload: {}", e),
        }

        if packet.header.marker && !access_unit.is_empty() {
            let first = *first_timestamp.get_or_insert(packet.header.timestamp);
            let millis = packet.header.timestamp.wrapping_sub(first) as u64 * 1000
                / VIDEO_CLOCK_RATE as u64;
            if units.send((std::mem::take(&mut access_unit), millis)).is_err() {
                break;
            }
        }
    }
    // Dropping `units` lets the decoder thread report the end of the stream
}

fn decode_loop(
    units: std::sync::mpsc::Receiver<(Vec<u8>, u64)>,
    frames: mpsc::Sender<VideoFrame>,
    link: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut decoder = match H264Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            error!("{}", e);
            let _ = link.send(LinkEvent::Failed(e.to_string()));
            return;
        }
    };

    for (unit, timestamp) in units {
        match decoder.decode(&unit, timestamp) {
            Ok(Some(frame)) => match frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Session busy, dropping frame {}", timestamp),
                Err(TrySendError::Closed(_)) => return,
            },
            Ok(None) => {}
            Err(e) => warn!("Skipping access unit at {} ms: {}", timestamp, e),
        }
    }
    let _ = link.send(LinkEvent::Ended);
}

struct EncodeJob {
    frame: VideoFrame,
    reply: oneshot::Sender<MediaResult<Vec<u8>>>,
}

/// Owns the H.264 encoder on its own thread; stops when dropped
struct EncoderWorker {
    jobs: std::sync::mpsc::Sender<EncodeJob>,
}

impl EncoderWorker {
    fn spawn() -> Result<Self, RoadRtcError> {
        let (jobs, queue) = std::sync::mpsc::channel::<EncodeJob>();
        std::thread::Builder::new()
            .name("roadrtc-h264-encode".to_string())
            .spawn(move || {
                let mut encoder = H264Encoder::new().map_err(|e| match e {
                    MediaError::Codec { message } => message,
                    other => other.to_string(),
                });
                for job in queue {
                    let result = match encoder.as_mut() {
                        Ok(encoder) => encoder.encode(&job.frame),
                        Err(message) => Err(MediaError::Codec {
                            message: message.clone(),
                        }),
                    };
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|e| RoadRtcError::Initialization {
                reason: format!("failed to start encoder thread: {}", e),
            })?;
        Ok(Self { jobs })
    }

    fn submit(
        &self,
        frame: VideoFrame,
    ) -> Result<oneshot::Receiver<MediaResult<Vec<u8>>>, RoadRtcError> {
        let (reply, result) = oneshot::channel();
        self.jobs
            .send(EncodeJob { frame, reply })
            .map_err(|_| RoadRtcError::Transport {
                reason: "H.264 encoder stopped".to_string(),
            })?;
        Ok(result)
    }
}

/// Factory creating one WebRTC transport per session
#[derive(Debug, Default)]
pub struct WebRtcFactory {
    config: WebRtcConfig,
}

impl WebRtcFactory {
    /// Shared factory for a host
    pub fn new(config: WebRtcConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

impl TransportFactory for WebRtcFactory {
    fn create(&self, session_id: &str) -> Result<Box<dyn MediaTransport>, RoadRtcError> {
        debug!("Creating WebRTC transport for session {}", session_id);
        Ok(Box::new(WebRtcTransport::new(self.config.clone())))
    }
}
