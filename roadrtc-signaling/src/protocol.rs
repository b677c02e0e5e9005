//! Signaling protocol messages between the browser page and the server

use roadrtc_core::{RoadRtcError, SessionDescription, SessionState};
use serde::{Deserialize, Serialize};

/// Messages sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Start a webcam session
    Start {
        /// Model key; the server default when absent
        model: Option<String>,
        /// Initial confidence threshold; the server default when absent
        threshold: Option<f32>,
        /// Browser SDP offer
        offer: SessionDescription,
    },
    /// Change the confidence threshold of the running session
    SetThreshold {
        /// New threshold in [0, 1]
        threshold: f32,
    },
    /// Toggle the live results table
    ShowResults {
        /// Whether results should be pushed
        show: bool,
    },
    /// Stop the running session
    Stop,
    /// List the models available on the server
    ListModels,
}

/// One row of the live results table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRow {
    /// Damage label, e.g. "Potholes"
    pub damage_type: String,
    /// Confidence as a percentage with one decimal, e.g. "87.5"
    pub confidence: String,
    /// Box corners as `[x1, y1, x2, y2]`
    pub location: String,
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// SDP answer for a started session
    Answer {
        /// Session ID
        session_id: String,
        /// Server SDP answer
        answer: SessionDescription,
    },
    /// Session state change
    State {
        /// Session ID
        session_id: String,
        /// New state
        state: SessionState,
    },
    /// Detections for one processed frame
    Results {
        /// Session ID
        session_id: String,
        /// Frame sequence number
        sequence: u64,
        /// Table rows in detector order
        rows: Vec<DetectionRow>,
    },
    /// Models available for `Start`
    Models {
        /// Model keys
        models: Vec<String>,
    },
    /// Error response
    Error {
        /// Error message
        error: String,
        /// Error code for programmatic handling
        error_code: String,
    },
}

impl ServerMessage {
    /// Error message for `err`
    pub fn error(err: &RoadRtcError) -> Self {
        ServerMessage::Error {
            error: err.to_string(),
            error_code: err.error_code(),
        }
    }
}
