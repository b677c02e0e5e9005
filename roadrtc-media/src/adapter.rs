//! Uniform detection call over a pluggable model
//!
//! [`DetectionAdapter`] owns the glue around a [`Detector`]: resizing frames to
//! the model's square input, validating what the model reports and restoring
//! the annotated frame to the caller's resolution.

use crate::detection::{Detection, DetectionList, RawDetection};
use crate::error::{MediaError, MediaResult};
use crate::frame::{VideoFrame, VideoResolution};
use crate::model_cache::ModelLease;
use std::fmt;
use tracing::{trace, warn};

/// Detector input side used by the bundled road damage models
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Raw output of one inference call
#[derive(Debug, Clone)]
pub struct Inference {
    /// Detections in input-image coordinates
    pub detections: Vec<RawDetection>,
    /// Input image with detections drawn on it
    pub annotated: VideoFrame,
}

/// A loaded object detection model.
///
/// Implementations must be immutable after load; one instance is shared by
/// every session that uses the same model.
pub trait Detector: Send + Sync {
    /// Run the model on a square frame of side [`Detector::input_size`]
    fn infer(&self, input: &VideoFrame, threshold: f32) -> MediaResult<Inference>;

    /// Side of the square input the model expects
    fn input_size(&self) -> u32 {
        DEFAULT_INPUT_SIZE
    }
}

/// Detection adapter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Override the model's own input size
    pub input_size: Option<u32>,
    /// Report boxes in the original frame's pixel space instead of the
    /// detector input space
    pub boxes_in_frame_space: bool,
}

impl AdapterConfig {
    pub fn validate(&self) -> MediaResult<()> {
        if self.input_size == Some(0) {
            return Err(MediaError::InvalidConfiguration {
                message: "detector input size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Check a confidence threshold
pub fn validate_threshold(threshold: f32) -> MediaResult<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(MediaError::InvalidThreshold { value: threshold })
    }
}

/// Wraps a leased model behind a single `detect` call
pub struct DetectionAdapter {
    model: ModelLease,
    config: AdapterConfig,
}

impl DetectionAdapter {
    pub fn new(model: ModelLease, config: AdapterConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    /// Key of the model in use
    pub fn model_key(&self) -> &str {
        self.model.key()
    }

    /// Square resolution frames are resized to before inference
    pub fn input_resolution(&self) -> VideoResolution {
        let side = self
            .config
            .input_size
            .unwrap_or_else(|| self.model.input_size());
        VideoResolution::square(side)
    }

    /// Detect damage in `frame`.
    ///
    /// Returns the detections scoring at least `threshold`, in detector order,
    /// and the annotated frame at the original resolution. The list's sequence
    /// number is left at zero for the caller to assign.
    pub fn detect(
        &self,
        frame: &VideoFrame,
        threshold: f32,
    ) -> MediaResult<(DetectionList, VideoFrame)> {
        validate_threshold(threshold)?;

        let input_resolution = self.input_resolution();
        let input = frame.resized(input_resolution)?;
        let inference = self.model.infer(&input, threshold)?;

        let mut detections = Vec::with_capacity(inference.detections.len());
        for raw in &inference.detections {
            let detection = match Detection::from_raw(raw) {
                Ok(detection) => detection,
                Err(e) => {
                    warn!("Dropping detection from {}: {}", self.model.key(), e);
                    continue;
                }
            };
            if detection.score() < threshold {
                continue;
            }
            if self.config.boxes_in_frame_space {
                detections.push(detection.scaled_to(input_resolution, frame.resolution()));
            } else {
                detections.push(detection);
            }
        }

        let mut annotated = inference.annotated.resized(frame.resolution())?;
        annotated.timestamp = frame.timestamp;

        trace!(
            "{} detections at threshold {:.2} ({} raw)",
            detections.len(),
            threshold,
            inference.detections.len()
        );

        Ok((
            DetectionList::new(0, frame.timestamp, detections),
            annotated,
        ))
    }
}

impl fmt::Debug for DetectionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionAdapter")
            .field("model", &self.model.key())
            .field("config", &self.config)
            .finish()
    }
}
