//! Error types for RoadRTC

use crate::relay::RelaySelectionError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for RoadRTC operations
#[derive(Error, Debug)]
pub enum RoadRtcError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// No relay endpoint could be resolved for the session
    #[error("Relay selection failed: {0}")]
    RelaySelection(#[from] RelaySelectionError),

    /// Signaling / ICE negotiation failed
    #[error("Negotiation failed: {reason}")]
    Negotiation {
        /// Reason for negotiation failure
        reason: String,
    },

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Media processing error
    #[error("Media processing error: {reason}")]
    MediaProcessing {
        /// Reason for media error
        reason: String,
    },

    /// Detection model could not be made available
    #[error("Model {model} unavailable: {reason}")]
    ModelUnavailable {
        /// Model key
        model: String,
        /// Reason the model is unavailable
        reason: String,
    },

    /// Session not found
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// Session ID
        session_id: String,
    },

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Server start failed
    #[error("Failed to start server on {address}: {source}")]
    ServerStartFailed {
        /// Address that failed to bind
        address: std::net::SocketAddr,
        /// Underlying error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RoadRtcError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            RoadRtcError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            RoadRtcError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            RoadRtcError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            RoadRtcError::RelaySelection(e) => match e {
                RelaySelectionError::Unavailable { .. } => "RELAY_DATA_UNAVAILABLE".to_string(),
                RelaySelectionError::NoCandidateMatched { .. } => {
                    "RELAY_NO_CANDIDATE_MATCHED".to_string()
                }
            },
            RoadRtcError::Negotiation { .. } => "NEGOTIATION_FAILED".to_string(),
            RoadRtcError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            RoadRtcError::MediaProcessing { .. } => "MEDIA_PROCESSING_ERROR".to_string(),
            RoadRtcError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE".to_string(),
            RoadRtcError::SessionNotFound { .. } => "SESSION_NOT_FOUND".to_string(),
            RoadRtcError::Timeout { .. } => "TIMEOUT".to_string(),
            RoadRtcError::ServerStartFailed { .. } => "SERVER_START_FAILED".to_string(),
            RoadRtcError::InvalidMessage { .. } => "INVALID_MESSAGE".to_string(),
        }
    }

    /// Whether the error prevents a session from being created at all
    pub fn is_configuration_failure(&self) -> bool {
        matches!(
            self,
            RoadRtcError::RelaySelection(_)
                | RoadRtcError::MissingConfiguration { .. }
                | RoadRtcError::InvalidConfiguration { .. }
                | RoadRtcError::ModelUnavailable { .. }
        )
    }
}
