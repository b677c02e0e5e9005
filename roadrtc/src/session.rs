//! Media session lifecycle
//!
//! A [`MediaSessionController`] owns one peer media connection: it negotiates
//! the transport, pumps inbound frames through the frame pipeline on the
//! blocking pool and sends the annotated frames back. Everyone else observes
//! and controls the session through a [`SessionHandle`].

use crate::config::{ConfidenceThreshold, SessionConfig, ViewSettings};
use crate::event::{EventStream, SessionEvent};
use crate::transport::MediaTransport;
use crate::{RoadRtc, RoadRtcError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use roadrtc_core::{
    state_channel, IceConfiguration, RelayEndpoint, SessionDescription, SessionState,
    StateReader, StateWriter,
};
use roadrtc_media::{
    DetectionAdapter, FrameOutcome, FrameProcessingPipeline, FrameProcessor, ProcessedFrame,
    ResultChannel, ResultReceiver, SharedThreshold, VideoFrame,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Buffered events per subscriber
const EVENT_CAPACITY: usize = 64;

/// Drives one peer media connection.
///
/// Created in `Idle`; [`MediaSessionController::start`] hands it a transport
/// and moves it onto its own task.
pub struct MediaSessionController {
    id: String,
    config: SessionConfig,
    pipeline: Arc<dyn FrameProcessor>,
    ice: IceConfiguration,
    remote_offer: Option<SessionDescription>,
    state: StateWriter,
    shared: SharedParts,
}

/// Pieces shared by the controller and all handles
#[derive(Clone)]
struct SharedParts {
    id: String,
    created_at: DateTime<Utc>,
    state: StateReader,
    stop: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<SessionEvent>,
    threshold: Option<SharedThreshold>,
    view: ViewSettings,
    results: Arc<Mutex<Option<ResultReceiver>>>,
}

impl MediaSessionController {
    /// New idle session running `pipeline` on every inbound frame
    pub fn new(config: SessionConfig, pipeline: Arc<dyn FrameProcessor>) -> Self {
        let id = Uuid::new_v4().to_string();
        let (state, reader) = state_channel();
        let (stop, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let view = ViewSettings::new(config.show_results);

        Self {
            shared: SharedParts {
                id: id.clone(),
                created_at: Utc::now(),
                state: reader,
                stop: Arc::new(stop),
                events,
                threshold: None,
                view,
                results: Arc::new(Mutex::new(None)),
            },
            id,
            config,
            pipeline,
            ice: IceConfiguration::default(),
            remote_offer: None,
            state,
        }
    }

    /// ICE servers used during negotiation
    pub fn ice_configuration(mut self, ice: IceConfiguration) -> Self {
        self.ice = ice;
        self
    }

    /// Browser offer to answer
    pub fn remote_offer(mut self, offer: SessionDescription) -> Self {
        self.remote_offer = Some(offer);
        self
    }

    /// Threshold the pipeline reads, for live updates through the handle
    pub fn threshold_control(mut self, threshold: SharedThreshold) -> Self {
        self.shared.threshold = Some(threshold);
        self
    }

    /// Consumer side of the pipeline's result channel
    pub fn results(self, receiver: ResultReceiver) -> Self {
        *self.shared.results.lock() = Some(receiver);
        self
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle for observing and controlling the session
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start negotiating over `transport` and return a handle.
    ///
    /// The session runs on its own task until it reaches a terminal state.
    pub fn start(self, transport: Box<dyn MediaTransport>) -> SessionHandle {
        let handle = self.handle();
        self.transition(SessionState::Negotiating);
        info!("Session {} negotiating", self.id);
        tokio::spawn(self.run(transport));
        handle
    }

    async fn run(self, mut transport: Box<dyn MediaTransport>) {
        let mut stop = self.shared.stop.subscribe();

        // Negotiation
        let negotiation = tokio::time::timeout(
            self.config.negotiation_timeout,
            transport.negotiate(&self.ice, self.remote_offer.clone()),
        );
        let negotiated = tokio::select! {
            result = negotiation => Some(result),
            _ = stop_requested(&mut stop) => None,
        };

        let outcome = match negotiated {
            None => Ok(SessionState::Stopped),
            Some(Err(_elapsed)) => Err(RoadRtcError::Timeout {
                operation: "negotiation".to_string(),
                duration: self.config.negotiation_timeout,
            }),
            Some(Ok(Err(e))) => Err(e),
            Some(Ok(Ok(answer))) => {
                if let Some(description) = answer {
                    self.emit(SessionEvent::LocalDescription { description });
                }
                self.transition(SessionState::Connected);
                info!("Session {} connected", self.id);
                self.pump_frames(transport.as_mut(), &mut stop).await
            }
        };

        transport.close().await;
        self.pipeline.close();

        match outcome {
            Ok(state) => {
                self.transition(state);
                info!("Session {} {}", self.id, state);
            }
            Err(e) => {
                error!("Session {} failed: {}", self.id, e);
                self.emit(SessionEvent::Error {
                    error: e.to_string(),
                    error_code: e.error_code(),
                });
                self.transition(SessionState::Failed);
            }
        }

        // The last pipeline reference holds the model lease, whose release
        // may wait on a model loading in another session
        let pipeline = self.pipeline;
        tokio::task::spawn_blocking(move || drop(pipeline));
    }

    /// Frame loop; returns the terminal state to enter.
    ///
    /// A stop request cancels whichever step is in flight: receiving,
    /// processing or sending.
    async fn pump_frames(
        &self,
        transport: &mut dyn MediaTransport,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<SessionState, RoadRtcError> {
        loop {
            let streaming = tokio::select! {
                biased;
                _ = stop_requested(stop) => return Ok(SessionState::Stopped),
                streaming = self.pump_one(transport) => streaming?,
            };
            if !streaming {
                debug!("Session {} remote stream ended", self.id);
                return Ok(SessionState::Stopped);
            }
        }
    }

    /// Receive, process and return one frame; false once the remote stream ended
    async fn pump_one(&self, transport: &mut dyn MediaTransport) -> Result<bool, RoadRtcError> {
        let Some(frame) = transport.recv_frame().await? else {
            return Ok(false);
        };

        let processed = self.process_on_blocking_pool(frame).await?;
        if let FrameOutcome::Failed { sequence, reason } = processed.outcome {
            self.emit(SessionEvent::FrameFailed { sequence, reason });
        }

        transport.send_frame(processed.frame).await?;
        if self.state.current() == SessionState::Connected {
            self.transition(SessionState::Playing);
        }
        Ok(true)
    }

    async fn process_on_blocking_pool(
        &self,
        frame: VideoFrame,
    ) -> Result<ProcessedFrame, RoadRtcError> {
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.process_frame(frame))
            .await
            .map_err(|e| RoadRtcError::MediaProcessing {
                reason: format!("frame pipeline task failed: {}", e),
            })
    }

    fn transition(&self, next: SessionState) {
        if let Some(from) = self.state.transition(next) {
            self.emit(SessionEvent::StateChanged { from, to: next });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    // The sender lives as long as the session, so this only returns on a stop
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Fluent builder for session configuration and startup
#[derive(Debug)]
pub struct SessionBuilder {
    roadrtc: RoadRtc,
    config: SessionConfig,
    threshold: Option<f32>,
    remote_offer: Option<SessionDescription>,
}

impl SessionBuilder {
    pub(crate) fn new(roadrtc: &RoadRtc) -> Self {
        Self {
            roadrtc: roadrtc.clone(),
            config: SessionConfig::default(),
            threshold: None,
            remote_offer: None,
        }
    }

    /// Replace the whole session configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Detection model key, with or without the `.pt` extension
    pub fn model(mut self, key: &str) -> Self {
        self.config.model = Some(key.to_string());
        self
    }

    /// Initial confidence threshold; snapped to the slider step on build
    pub fn threshold(mut self, value: f32) -> Self {
        self.threshold = Some(value);
        self
    }

    /// Skip relay discovery and use `relay`
    pub fn relay(mut self, relay: RelayEndpoint) -> Self {
        self.config.relay_override = Some(relay);
        self
    }

    /// Browser offer to answer during negotiation
    pub fn remote_offer(mut self, offer: SessionDescription) -> Self {
        self.remote_offer = Some(offer);
        self
    }

    /// Whether the results table starts visible
    pub fn show_results(mut self, show: bool) -> Self {
        self.config.show_results = show;
        self
    }

    /// Build an idle session.
    ///
    /// The relay is resolved first; when that fails no model is loaded and
    /// no session exists.
    pub async fn build(self) -> Result<MediaSessionController, RoadRtcError> {
        let mut config = self.config;
        if let Some(value) = self.threshold {
            config.threshold = ConfidenceThreshold::new(value)?;
        }
        config.validate()?;

        let ice = self
            .roadrtc
            .resolve_ice(config.relay_override.as_ref())
            .await?;

        let model_key = config
            .model
            .clone()
            .unwrap_or_else(|| self.roadrtc.config().default_model.clone());
        // Loading reads the model file and holds the cache lock
        let models = self.roadrtc.models().clone();
        let key = model_key.clone();
        let lease = tokio::task::spawn_blocking(move || models.acquire(&key))
            .await
            .map_err(|e| RoadRtcError::ModelUnavailable {
                model: model_key,
                reason: format!("model load task failed: {}", e),
            })??;
        let adapter = DetectionAdapter::new(lease, config.adapter.clone())?;

        let threshold = SharedThreshold::new(config.threshold.value())?;
        let (sender, receiver) = ResultChannel::bounded(config.results.clone())?;
        let pipeline = FrameProcessingPipeline::new(adapter, threshold.clone(), sender);
        info!(
            "Session pipeline ready: model {}, threshold {}",
            pipeline.model_key(),
            config.threshold
        );

        let mut controller = MediaSessionController::new(config, Arc::new(pipeline))
            .ice_configuration(ice)
            .threshold_control(threshold)
            .results(receiver);
        if let Some(offer) = self.remote_offer {
            controller = controller.remote_offer(offer);
        }
        Ok(controller)
    }

    /// Build and start over `transport`
    pub async fn start(
        self,
        transport: Box<dyn MediaTransport>,
    ) -> Result<SessionHandle, RoadRtcError> {
        Ok(self.build().await?.start(transport))
    }
}

/// Observer/controller view of a session
#[derive(Clone)]
pub struct SessionHandle {
    shared: SharedParts,
}

impl SessionHandle {
    /// Session ID
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// When the session was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    /// Current state, never blocks
    pub fn state(&self) -> SessionState {
        self.shared.state.current()
    }

    /// Reader for waiting on state changes
    pub fn state_reader(&self) -> StateReader {
        self.shared.state.clone()
    }

    /// Request the session to stop.
    ///
    /// A no-op unless the session is negotiating, connected or playing.
    pub fn stop(&self) {
        if self.state().is_active() {
            debug!("Stop requested for session {}", self.shared.id);
            self.shared.stop.send_replace(true);
        }
    }

    /// Wait for `Stopped` or `Failed`
    pub async fn wait_for_terminal(&self) -> SessionState {
        let mut reader = self.shared.state.clone();
        reader.wait_until(SessionState::is_terminal).await
    }

    /// Change the detection threshold; applies from the next frame.
    ///
    /// Returns the snapped value in effect.
    pub fn set_threshold(&self, value: f32) -> Result<ConfidenceThreshold, RoadRtcError> {
        let threshold = ConfidenceThreshold::new(value)?;
        let control = self
            .shared
            .threshold
            .as_ref()
            .ok_or_else(|| RoadRtcError::MissingConfiguration {
                field: "threshold_control".to_string(),
            })?;
        control.set(threshold.value())?;
        debug!("Session {} threshold {}", self.shared.id, threshold);
        Ok(threshold)
    }

    /// Current detection threshold, if the session exposes one
    pub fn threshold(&self) -> Option<f32> {
        self.shared.threshold.as_ref().map(SharedThreshold::get)
    }

    /// Results-table toggle
    pub fn view(&self) -> &ViewSettings {
        &self.shared.view
    }

    /// Take the result receiver; only the first caller gets it
    pub fn take_results(&self) -> Option<ResultReceiver> {
        let taken = self.shared.results.lock().take();
        if taken.is_none() {
            warn!("Results of session {} already taken", self.shared.id);
        }
        taken
    }

    /// Subscribe to session events from now on
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.shared.events.subscribe())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl std::fmt::Debug for MediaSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSessionController")
            .field("id", &self.id)
            .field("state", &self.state.current())
            .field("ice", &self.ice)
            .finish()
    }
}
