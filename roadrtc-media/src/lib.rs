//! # RoadRTC Media
//!
//! Frame processing for RoadRTC sessions: raw frames, road damage detections,
//! the detection adapter, model caching, the per-frame pipeline, the
//! result channel feeding the display loop and H.264 coding for browser video.

#![warn(clippy::all)]

pub mod adapter;
pub mod codec;
pub mod detection;
pub mod error;
pub mod frame;
pub mod model_cache;
pub mod pipeline;
pub mod results;

// Re-export main types
pub use adapter::{AdapterConfig, DetectionAdapter, Detector, Inference, DEFAULT_INPUT_SIZE};
#[cfg(feature = "h264")]
pub use codec::{H264Decoder, H264Encoder};
pub use detection::{BoundingBox, Detection, DetectionList, RawDetection, LABELS};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use frame::{VideoFrame, VideoResolution};
pub use model_cache::{ModelCache, ModelLease, ModelLoader, ModelStore, DEFAULT_MODEL};
pub use pipeline::{
    FrameOutcome, FrameProcessingPipeline, FrameProcessor, PipelineStats, ProcessedFrame,
    SharedThreshold,
};
pub use results::{
    OverflowPolicy, PublishOutcome, RecvOutcome, ResultChannel, ResultChannelConfig,
    ResultReceiver, ResultSender, TryRecvError,
};
