//! Media processing error types and handling
//!
//! This module defines the error types used throughout the frame pipeline,
//! detection adapter and model cache.

use roadrtc_core::RoadRtcError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Frame with a zero dimension
    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Frame width
        width: u32,
        /// Frame height
        height: u32,
    },

    /// Confidence threshold outside [0, 1]
    #[error("Invalid confidence threshold: {value}")]
    InvalidThreshold {
        /// Rejected value
        value: f32,
    },

    /// Detector reported a class outside the label list
    #[error("Unknown damage class id: {class_id}")]
    UnknownClass {
        /// Reported class id
        class_id: usize,
    },

    /// Detector reported a confidence outside [0, 1]
    #[error("Invalid confidence score: {value}")]
    InvalidScore {
        /// Rejected value
        value: f32,
    },

    /// Detector reported an unusable bounding box
    #[error("Invalid bounding box: {reason}")]
    InvalidBox {
        /// Why the box was rejected
        reason: String,
    },

    /// Inference call failed
    #[error("Detection failed: {reason}")]
    DetectionFailed {
        /// Failure reason
        reason: String,
    },

    /// Model file is not present locally
    #[error("Model {model} not found at {path}")]
    ModelNotFound {
        /// Model key
        model: String,
        /// Expected local path
        path: PathBuf,
    },

    /// Model file exists but could not be loaded
    #[error("Failed to load model {model}: {reason}")]
    ModelLoadFailed {
        /// Model key
        model: String,
        /// Failure reason
        reason: String,
    },

    /// Image conversion failed
    #[error("Video error: {message}")]
    Video {
        /// Error message
        message: String,
    },

    /// Encoding or decoding a compressed frame failed
    #[error("Codec error: {message}")]
    Codec {
        /// Error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    ///
    /// Recoverable errors affect a single frame; the next frame may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::DetectionFailed { .. } => true,
            MediaError::InvalidFrameData { .. } => true,
            MediaError::InvalidDimensions { .. } => true,
            MediaError::UnknownClass { .. } => true,
            MediaError::InvalidScore { .. } => true,
            MediaError::InvalidBox { .. } => true,
            MediaError::Video { .. } => true,
            MediaError::Codec { .. } => true,
            MediaError::Io { .. } => false,
            MediaError::ModelNotFound { .. } => false,
            MediaError::ModelLoadFailed { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::InvalidThreshold { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::InvalidThreshold { .. } => ErrorCategory::Configuration,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::InvalidDimensions { .. } => ErrorCategory::Data,
            MediaError::UnknownClass { .. } => ErrorCategory::Detection,
            MediaError::InvalidScore { .. } => ErrorCategory::Detection,
            MediaError::InvalidBox { .. } => ErrorCategory::Detection,
            MediaError::DetectionFailed { .. } => ErrorCategory::Detection,
            MediaError::ModelNotFound { .. } => ErrorCategory::Model,
            MediaError::ModelLoadFailed { .. } => ErrorCategory::Model,
            MediaError::Video { .. } => ErrorCategory::Video,
            MediaError::Codec { .. } => ErrorCategory::Video,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O, permissions, etc.)
    System,
    /// Configuration and parameter errors
    Configuration,
    /// Data validation errors
    Data,
    /// Detector output errors
    Detection,
    /// Model resolution and loading errors
    Model,
    /// Video-specific errors
    Video,
}

impl From<MediaError> for RoadRtcError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::ModelNotFound { model, path } => RoadRtcError::ModelUnavailable {
                model,
                reason: format!("not found at {}", path.display()),
            },
            MediaError::ModelLoadFailed { model, reason } => {
                RoadRtcError::ModelUnavailable { model, reason }
            }
            MediaError::InvalidConfiguration { message } => {
                RoadRtcError::InvalidConfiguration { message }
            }
            MediaError::InvalidThreshold { value } => RoadRtcError::InvalidConfiguration {
                message: format!("confidence threshold {} outside [0, 1]", value),
            },
            other => RoadRtcError::MediaProcessing {
                reason: other.to_string(),
            },
        }
    }
}
