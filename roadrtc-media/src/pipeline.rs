//! Per-frame processing for a live session
//!
//! The transport hands every inbound frame to a [`FrameProcessor`]. The
//! detection pipeline resizes, detects, annotates and publishes results; a
//! frame whose detection fails goes back out untouched so the stream keeps
//! flowing.

use crate::adapter::{validate_threshold, DetectionAdapter};
use crate::error::MediaResult;
use crate::frame::VideoFrame;
use crate::results::{PublishOutcome, ResultSender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Confidence threshold shared between the UI and a running pipeline
#[derive(Debug, Clone)]
pub struct SharedThreshold {
    bits: Arc<AtomicU32>,
}

impl SharedThreshold {
    pub fn new(value: f32) -> MediaResult<Self> {
        validate_threshold(value)?;
        Ok(Self {
            bits: Arc::new(AtomicU32::new(value.to_bits())),
        })
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Takes effect from the next frame
    pub fn set(&self, value: f32) -> MediaResult<()> {
        validate_threshold(value)?;
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Detection ran and its results were published
    Detected {
        /// Frame sequence number
        sequence: u64,
        /// Detections above the threshold
        detections: usize,
    },
    /// Detection failed; the original frame was passed through
    Failed {
        /// Frame sequence number
        sequence: u64,
        /// Failure description
        reason: String,
    },
}

/// Output frame plus its outcome
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: VideoFrame,
    pub outcome: FrameOutcome,
}

/// Per-frame transform invoked by the media transport.
///
/// Calls may block for the duration of model inference.
pub trait FrameProcessor: Send + Sync {
    /// Transform one frame and report what happened
    fn process_frame(&self, frame: VideoFrame) -> ProcessedFrame;

    /// Transform one frame
    fn process(&self, frame: VideoFrame) -> VideoFrame {
        self.process_frame(frame).frame
    }

    /// Stop publishing results
    fn close(&self) {}
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Frames run through detection successfully
    pub frames_processed: u64,
    /// Frames passed through after a detection failure
    pub frames_failed: u64,
    /// Detections published across all frames
    pub detections_published: u64,
    /// Lists the result channel dropped on overflow
    pub results_dropped: u64,
    /// Time spent in successful detection calls
    pub total_processing_time: Duration,
}

impl PipelineStats {
    pub fn average_processing_time(&self) -> Duration {
        if self.frames_processed == 0 {
            return Duration::ZERO;
        }
        self.total_processing_time
            .div_f64(self.frames_processed as f64)
    }
}

/// Resize, detect, annotate and publish for one session
#[derive(Debug)]
pub struct FrameProcessingPipeline {
    adapter: DetectionAdapter,
    threshold: SharedThreshold,
    results: ResultSender,
    sequence: AtomicU64,
    stats: RwLock<PipelineStats>,
}

impl FrameProcessingPipeline {
    pub fn new(adapter: DetectionAdapter, threshold: SharedThreshold, results: ResultSender) -> Self {
        Self {
            adapter,
            threshold,
            results,
            sequence: AtomicU64::new(0),
            stats: RwLock::new(PipelineStats::default()),
        }
    }

    /// Threshold handle for live updates
    pub fn threshold(&self) -> &SharedThreshold {
        &self.threshold
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    pub fn model_key(&self) -> &str {
        self.adapter.model_key()
    }
}

impl FrameProcessor for FrameProcessingPipeline {
    fn process_frame(&self, frame: VideoFrame) -> ProcessedFrame {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let threshold = self.threshold.get();
        let started = Instant::now();

        match self.adapter.detect(&frame, threshold) {
            Ok((mut list, annotated)) => {
                let elapsed = started.elapsed();
                list.sequence = sequence;
                let detections = list.len();
                let published = self.results.publish(list);

                let mut stats = self.stats.write();
                stats.frames_processed += 1;
                stats.total_processing_time += elapsed;
                match published {
                    PublishOutcome::Queued | PublishOutcome::EvictedOldest => {
                        stats.detections_published += detections as u64
                    }
                    PublishOutcome::Discarded | PublishOutcome::Closed => {}
                }
                stats.results_dropped = self.results.dropped();

                ProcessedFrame {
                    frame: annotated,
                    outcome: FrameOutcome::Detected {
                        sequence,
                        detections,
                    },
                }
            }
            Err(e) => {
                warn!("Frame {} passed through unannotated: {}", sequence, e);
                self.stats.write().frames_failed += 1;
                ProcessedFrame {
                    frame,
                    outcome: FrameOutcome::Failed {
                        sequence,
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    fn close(&self) {
        let stats = self.stats.read();
        debug!(
            "Closing pipeline for {}: {} processed, {} failed, avg {:?}",
            self.adapter.model_key(),
            stats.frames_processed,
            stats.frames_failed,
            stats.average_processing_time()
        );
        self.results.close();
    }
}
