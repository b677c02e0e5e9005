//! Stubs shared by the facade integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use roadrtc::{
    Dataset, Detector, GlobalConfig, Inference, MediaError, ModelLoader, NetworkPathSelector,
    RawDetection, RelayDirectory, RelaySelectionError, RoadRtc, SessionState, StateReader,
    VideoFrame,
};
use roadrtc_media::MediaResult;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const MODEL: &str = "YOLOv8_Small_RDD";

/// Frames whose first pixel has this colour make detection fail
pub const UNREADABLE: [u8; 3] = [0, 0, 255];
pub const WHITE: [u8; 3] = [255, 255, 255];

/// Finds a pothole (0.9) and an alligator crack (0.2) in every frame and
/// paints the input white as its annotation
pub struct StubDetector;

impl Detector for StubDetector {
    fn infer(&self, input: &VideoFrame, _threshold: f32) -> MediaResult<Inference> {
        if input.pixel(0, 0) == Some(UNREADABLE) {
            return Err(MediaError::DetectionFailed {
                reason: "unreadable frame".to_string(),
            });
        }
        Ok(Inference {
            detections: vec![
                RawDetection {
                    class_id: 2,
                    confidence: 0.9,
                    xyxy: [2.0, 4.0, 12.0, 20.0],
                },
                RawDetection {
                    class_id: 0,
                    confidence: 0.2,
                    xyxy: [0.0, 0.0, 8.0, 8.0],
                },
            ],
            annotated: VideoFrame::filled(input.width, input.height, WHITE, 0)?,
        })
    }

    fn input_size(&self) -> u32 {
        32
    }
}

#[derive(Default)]
pub struct StubLoader {
    pub loads: AtomicUsize,
}

impl ModelLoader for StubLoader {
    fn load(&self, _key: &str, _path: &Path) -> MediaResult<Arc<dyn Detector>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubDetector))
    }
}

/// Relay datasets served from memory; `reachable = false` fails every fetch
pub struct StubDirectory {
    reachable: bool,
}

#[async_trait]
impl RelayDirectory for StubDirectory {
    async fn fetch(&self, dataset: Dataset) -> Result<String, RelaySelectionError> {
        if !self.reachable {
            return Err(RelaySelectionError::Unavailable {
                dataset,
                reason: "network unreachable".to_string(),
            });
        }
        Ok(match dataset {
            Dataset::GeoMap => r#"{"192.0.2.10": [48.1, 11.6], "198.51.100.7": [-33.9, 151.2]}"#,
            Dataset::CallerLocation => r#"{"latitude": 52.5, "longitude": 13.4}"#,
            Dataset::Candidates => "192.0.2.10:3478\n198.51.100.7:3478\n",
        }
        .to_string())
    }
}

pub struct Fixture {
    pub roadrtc: RoadRtc,
    pub loader: Arc<StubLoader>,
    _models: TempDir,
}

pub fn fixture(relay_reachable: bool) -> Fixture {
    let loader = Arc::new(StubLoader::default());
    let (roadrtc, models) = roadrtc_with_loader(relay_reachable, loader.clone());
    Fixture {
        roadrtc,
        loader,
        _models: models,
    }
}

/// RoadRtc over a temporary models directory holding [`MODEL`]
pub fn roadrtc_with_loader(
    relay_reachable: bool,
    loader: Arc<dyn ModelLoader>,
) -> (RoadRtc, TempDir) {
    let models = tempfile::tempdir().unwrap();
    std::fs::write(models.path().join(format!("{}.pt", MODEL)), "weights").unwrap();

    let config = GlobalConfig {
        models_dir: models.path().to_path_buf(),
        ..Default::default()
    };
    let selector = NetworkPathSelector::with_directory(
        Arc::new(StubDirectory {
            reachable: relay_reachable,
        }),
        Duration::from_secs(2),
        None,
    );
    let roadrtc = RoadRtc::with_selector(config, loader, selector).unwrap();
    (roadrtc, models)
}

pub fn camera_frame(timestamp: u64) -> VideoFrame {
    VideoFrame::filled(64, 48, [40, 80, 120], timestamp).unwrap()
}

pub async fn wait_for_state(reader: &StateReader, state: SessionState) {
    let mut reader = reader.clone();
    tokio::time::timeout(Duration::from_secs(2), reader.wait_until(|s| s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", state));
}
