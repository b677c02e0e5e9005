//! # RoadRTC - Real-Time Road Damage Detection
//!
//! RoadRTC runs a road damage detector over a browser's webcam stream: every
//! inbound frame is resized, passed through the selected model, annotated and
//! sent back, while the detections are pushed to the page as a results table.
//!
//! ## Key Features
//!
//! - **Closest relay**: STUN relay chosen by geographic distance to the caller
//! - **Shared models**: one loaded copy per model, released with its last session
//! - **Live controls**: confidence threshold and results table adjustable mid-stream
//! - **Bounded results**: slow consumers lose old results, never stall the video
//! - **Browser video**: H.264 over WebRTC with the `webrtc` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roadrtc::{GlobalConfig, LoopbackConfig, LoopbackTransport, RoadRtc};
//! # use roadrtc::ModelLoader;
//! # use std::sync::Arc;
//! # fn loader() -> Arc<dyn ModelLoader> { unimplemented!() }
//!
//! # async fn example() -> Result<(), roadrtc::RoadRtcError> {
//! let roadrtc = RoadRtc::init_with(GlobalConfig::from_env()?, loader())?;
//!
//! let (transport, _browser) = LoopbackTransport::pair(LoopbackConfig::default());
//! let session = roadrtc
//!     .session()
//!     .model("YOLOv8_Small_RDD")
//!     .threshold(0.45)
//!     .start(Box::new(transport))
//!     .await?;
//!
//! let mut events = session.subscribe_events();
//! while let Some(event) = events.next().await {
//!     println!("Session event: {:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use roadrtc_core::{
    Dataset, IceConfiguration, IceServer, NetworkPathSelector, RelayDirectory, RelayDiscoveryConfig,
    RelayEndpoint, RelaySelectionError, RoadRtcError, SdpType, SessionDescription, SessionState,
    StateReader,
};

pub use roadrtc_media::{
    AdapterConfig, BoundingBox, Detection, DetectionList, Detector, Inference, MediaError,
    ModelCache, ModelLoader, ModelStore, OverflowPolicy, RawDetection, ResultChannelConfig,
    ResultReceiver, VideoFrame, VideoResolution,
};

pub use roadrtc_signaling::{ClientMessage, DetectionRow, ServerMessage, SignalingServer};

// Public API modules
pub mod config;
pub mod display;
pub mod event;
pub mod host;
pub mod logging;
#[cfg(feature = "webrtc")]
pub mod peer;
pub mod session;
pub mod transport;

// Re-export main API types
pub use config::{ConfidenceThreshold, GlobalConfig, SessionConfig, ViewSettings};
pub use display::{run_display_loop, DetectionTable, DisplayStats, ResultRenderer};
pub use event::{EventStream, SessionEvent};
pub use host::WebcamHost;
pub use logging::init_logging;
#[cfg(feature = "webrtc")]
pub use peer::{WebRtcConfig, WebRtcFactory, WebRtcTransport};
pub use session::{MediaSessionController, SessionBuilder, SessionHandle};
pub use transport::{
    LoopbackConfig, LoopbackFactory, LoopbackPeer, LoopbackTransport, MediaTransport,
    TransportFactory,
};

use std::sync::Arc;
use tracing::{info, warn};

/// Main entry point for RoadRTC
#[derive(Debug, Clone)]
pub struct RoadRtc {
    inner: Arc<RoadRtcInner>,
}

#[derive(Debug)]
struct RoadRtcInner {
    config: GlobalConfig,
    models: ModelCache,
    selector: NetworkPathSelector,
}

impl RoadRtc {
    /// Initialize with HTTP relay discovery
    ///
    /// `loader` turns model files from `config.models_dir` into detectors.
    pub fn init_with(
        config: GlobalConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, RoadRtcError> {
        let selector = NetworkPathSelector::new(config.relay.clone()).map_err(|e| {
            RoadRtcError::Initialization {
                reason: format!("Failed to create relay discovery client: {}", e),
            }
        })?;
        Self::with_selector(config, loader, selector)
    }

    /// Initialize with a custom relay selector
    pub fn with_selector(
        config: GlobalConfig,
        loader: Arc<dyn ModelLoader>,
        selector: NetworkPathSelector,
    ) -> Result<Self, RoadRtcError> {
        config.validate()?;
        let models = ModelCache::new(ModelStore::new(config.models_dir.clone()), loader);
        info!(
            "RoadRTC initialized, models from {}",
            config.models_dir.display()
        );

        Ok(Self {
            inner: Arc::new(RoadRtcInner {
                config,
                models,
                selector,
            }),
        })
    }

    /// Global configuration
    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    /// Shared model cache
    pub fn models(&self) -> &ModelCache {
        &self.inner.models
    }

    /// Model keys available in the models directory
    pub fn available_models(&self) -> Result<Vec<String>, RoadRtcError> {
        Ok(self.inner.models.store().list()?)
    }

    /// ICE configuration for a new session.
    ///
    /// Uses `relay` when given, otherwise runs relay discovery. A discovery
    /// failure is a configuration failure: no session should be created.
    pub async fn resolve_ice(
        &self,
        relay: Option<&RelayEndpoint>,
    ) -> Result<IceConfiguration, RoadRtcError> {
        let endpoint = match relay {
            Some(endpoint) => endpoint.clone(),
            None => self
                .inner
                .selector
                .select_relay_endpoint()
                .await
                .map_err(|e| {
                    warn!("Relay selection failed: {}", e);
                    RoadRtcError::RelaySelection(e)
                })?,
        };
        Ok(IceConfiguration::from_relay(&endpoint))
    }

    /// Create a session builder
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn example(roadrtc: roadrtc::RoadRtc) -> Result<(), roadrtc::RoadRtcError> {
    /// let controller = roadrtc
    ///     .session()
    ///     .threshold(0.3)
    ///     .show_results(false)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn session(&self) -> SessionBuilder {
        SessionBuilder::new(self)
    }
}
