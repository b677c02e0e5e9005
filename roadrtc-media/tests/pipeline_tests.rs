//! Frame pipeline tests
//!
//! Covers threshold filtering, label derivation, deterministic output shape and
//! pass-through of frames whose detection fails.

use roadrtc_media::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// DETECTOR STUBS
// ============================================================================

/// Emits one detection per class with confidences spread over [0, 1] and
/// paints the input white as its "annotation"
struct SpreadDetector;

impl Detector for SpreadDetector {
    fn infer(&self, input: &VideoFrame, _threshold: f32) -> MediaResult<Inference> {
        let detections = (0..LABELS.len())
            .map(|class_id| RawDetection {
                class_id,
                confidence: class_id as f32 / (LABELS.len() - 1) as f32,
                xyxy: [
                    10.0 * class_id as f32,
                    20.0,
                    10.0 * class_id as f32 + 50.0,
                    80.0,
                ],
            })
            .collect();
        let annotated = VideoFrame::filled(input.width, input.height, [255, 255, 255], 0)?;
        Ok(Inference {
            detections,
            annotated,
        })
    }
}

/// Fails every other call
struct FlakyDetector {
    calls: AtomicUsize,
}

impl Detector for FlakyDetector {
    fn infer(&self, input: &VideoFrame, _threshold: f32) -> MediaResult<Inference> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(MediaError::DetectionFailed {
                reason: "inference backend error".to_string(),
            });
        }
        Ok(Inference {
            detections: Vec::new(),
            annotated: input.clone(),
        })
    }
}

fn pipeline_with(
    detector: Arc<dyn Detector>,
    threshold: f32,
) -> (FrameProcessingPipeline, ResultReceiver) {
    let adapter =
        DetectionAdapter::new(ModelLease::detached("stub", detector), AdapterConfig::default())
            .unwrap();
    let (tx, rx) = ResultChannel::bounded(ResultChannelConfig {
        capacity: 64,
        overflow: OverflowPolicy::DropOldest,
    })
    .unwrap();
    let pipeline =
        FrameProcessingPipeline::new(adapter, SharedThreshold::new(threshold).unwrap(), tx);
    (pipeline, rx)
}

/// Frame with a gradient so pass-through can be checked byte for byte
fn gradient_frame(width: u32, height: u32, timestamp: u64) -> VideoFrame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
    }
    VideoFrame::new(width, height, data, timestamp).unwrap()
}

// ============================================================================
// DETECTION PROPERTIES
// ============================================================================

#[test]
fn test_scores_respect_threshold_and_labels_follow_class() {
    let (pipeline, mut rx) = pipeline_with(Arc::new(SpreadDetector), 0.0);
    let thresholds = [0.0, 0.05, 0.2, 0.5, 0.6, 0.8, 0.95, 1.0];

    for threshold in thresholds {
        pipeline.threshold().set(threshold).unwrap();
        pipeline.process(gradient_frame(320, 240, 0));

        let list = rx.try_recv().unwrap();
        for detection in &list {
            assert!(detection.score() >= threshold);
            assert_eq!(detection.label(), LABELS[detection.class_id()]);
        }
        let expected = (0..LABELS.len())
            .filter(|c| *c as f32 / (LABELS.len() - 1) as f32 >= threshold)
            .count();
        assert_eq!(list.len(), expected, "threshold {}", threshold);
    }
}

#[test]
fn test_identical_frames_give_identical_lists() {
    let (pipeline, mut rx) = pipeline_with(Arc::new(SpreadDetector), 0.5);
    let frame = gradient_frame(640, 480, 100);

    let first_out = pipeline.process(frame.clone());
    let second_out = pipeline.process(frame.clone());
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(first.detections, second.detections);
    assert_eq!(first.sequence + 1, second.sequence);
    assert_eq!(first_out, second_out);
    assert_eq!(first_out.resolution(), frame.resolution());
}

#[test]
fn test_annotated_frame_returned_at_original_size() {
    let (pipeline, _rx) = pipeline_with(Arc::new(SpreadDetector), 0.5);
    let frame = gradient_frame(1280, 720, 5);

    let out = pipeline.process(frame);
    assert_eq!(out.resolution(), VideoResolution::HD);
    assert_eq!(out.pixel(0, 0), Some([255, 255, 255]));
    assert_eq!(out.timestamp, 5);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[test]
fn test_failed_detection_passes_frame_through() {
    let detector = Arc::new(FlakyDetector {
        calls: AtomicUsize::new(0),
    });
    let (pipeline, mut rx) = pipeline_with(detector, 0.5);

    let first = gradient_frame(300, 200, 1);
    let second = gradient_frame(300, 200, 2);
    let third = gradient_frame(300, 200, 3);

    let out = pipeline.process_frame(first);
    assert!(matches!(out.outcome, FrameOutcome::Detected { sequence: 0, .. }));

    let out = pipeline.process_frame(second.clone());
    assert_eq!(out.frame, second);
    assert!(matches!(out.outcome, FrameOutcome::Failed { sequence: 1, .. }));

    // The pipeline keeps going after a failure
    let out = pipeline.process_frame(third);
    assert!(matches!(out.outcome, FrameOutcome::Detected { sequence: 2, .. }));

    let stats = pipeline.stats();
    assert_eq!(stats.frames_processed, 2);
    assert_eq!(stats.frames_failed, 1);

    // Only successful frames publish
    assert_eq!(rx.try_recv().unwrap().sequence, 0);
    assert_eq!(rx.try_recv().unwrap().sequence, 2);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn test_unknown_class_dropped_not_fatal() {
    struct OddDetector;

    impl Detector for OddDetector {
        fn infer(&self, input: &VideoFrame, _threshold: f32) -> MediaResult<Inference> {
            Ok(Inference {
                detections: vec![
                    RawDetection {
                        class_id: 42,
                        confidence: 0.99,
                        xyxy: [0.0, 0.0, 10.0, 10.0],
                    },
                    RawDetection {
                        class_id: 2,
                        confidence: 0.9,
                        xyxy: [100.0, 120.0, 40.0, 60.0],
                    },
                ],
                annotated: input.clone(),
            })
        }
    }

    let (pipeline, mut rx) = pipeline_with(Arc::new(OddDetector), 0.5);
    pipeline.process(gradient_frame(64, 64, 0));

    let list = rx.try_recv().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list.detections[0].label(), "Potholes");
    assert_eq!(list.detections[0].bbox(), BoundingBox::new(40, 60, 100, 120));
}

#[tokio::test]
async fn test_closing_pipeline_ends_result_stream() {
    let (pipeline, mut rx) = pipeline_with(Arc::new(SpreadDetector), 0.5);
    pipeline.process(gradient_frame(64, 64, 0));
    pipeline.close();

    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none());
}
