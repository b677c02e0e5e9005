//! Loopback Session Demo
//!
//! Runs a road damage session against an in-process "browser" and prints the
//! detection table for each frame. A synthetic detector stands in for a real
//! model: it reports a pothole wherever the frame is bright.
//!
//! Pass `serve` to also accept browser sessions over WebRTC on the signaling
//! address (`ROADRTC_SIGNALING_ADDR`, default 127.0.0.1:8765) until Ctrl-C.

use anyhow::Context;
use async_trait::async_trait;
use roadrtc::{
    init_logging, run_display_loop, DetectionTable, Detector, GlobalConfig, Inference,
    LoopbackConfig, LoopbackTransport, ModelLoader, RawDetection, RelayEndpoint,
    ResultRenderer, RoadRtc, RoadRtcError, SignalingServer, VideoFrame, WebRtcConfig, WebRtcFactory,
    WebcamHost,
};
use roadrtc_media::MediaResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Reports one pothole whose confidence is the frame's mean brightness
struct BrightSpotDetector;

impl Detector for BrightSpotDetector {
    fn infer(&self, input: &VideoFrame, _threshold: f32) -> MediaResult<Inference> {
        let mean = input.data.iter().map(|&b| b as u64).sum::<u64>() as f32
            / input.data.len().max(1) as f32
            / 255.0;

        let mut annotated = input.clone();
        for x in 0..input.width {
            annotated.set_pixel(x, 0, [0, 255, 0]);
            annotated.set_pixel(x, input.height - 1, [0, 255, 0]);
        }

        Ok(Inference {
            detections: vec![RawDetection {
                class_id: 2,
                confidence: mean,
                xyxy: [0.0, 0.0, input.width as f32, input.height as f32],
            }],
            annotated,
        })
    }

    fn input_size(&self) -> u32 {
        160
    }
}

struct SyntheticLoader;

impl ModelLoader for SyntheticLoader {
    fn load(&self, key: &str, path: &Path) -> MediaResult<Arc<dyn Detector>> {
        info!("Loading synthetic model {} from {}", key, path.display());
        Ok(Arc::new(BrightSpotDetector))
    }
}

/// Prints each table to stdout
struct StdoutRenderer;

#[async_trait]
impl ResultRenderer for StdoutRenderer {
    async fn render(&mut self, table: DetectionTable) -> Result<(), RoadRtcError> {
        println!("frame {}\n{}", table.sequence, table);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = GlobalConfig::from_env()?;
    init_logging(&config.log_directive)?;

    info!("🚧 RoadRTC Loopback Session Demo");

    let models = tempfile::tempdir().context("creating models directory")?;
    std::fs::write(
        models.path().join(format!("{}.pt", config.default_model)),
        b"synthetic",
    )
    .context("writing model file")?;
    config.models_dir = models.path().to_path_buf();

    let roadrtc = RoadRtc::init_with(config.clone(), Arc::new(SyntheticLoader))?;
    info!("Available models: {:?}", roadrtc.available_models()?);

    // A fixed relay keeps the demo offline
    let relay = RelayEndpoint::new("74.125.250.129", 19302);

    let (transport, mut browser) = LoopbackTransport::pair(LoopbackConfig::default());
    let session = roadrtc
        .session()
        .relay(relay.clone())
        .threshold(0.3)
        .start(Box::new(transport))
        .await?;

    let display = tokio::spawn(run_display_loop(
        session
            .take_results()
            .context("results already taken")?,
        session.state_reader(),
        session.view().clone(),
        StdoutRenderer,
        Duration::from_millis(100),
    ));

    for (i, brightness) in [40u8, 120, 200, 250].into_iter().enumerate() {
        let frame = VideoFrame::filled(640, 480, [brightness; 3], i as u64 * 33)?;
        browser.send_frame(frame).await;
        let annotated = browser
            .recv_frame()
            .await
            .context("session stopped early")?;
        info!(
            "Frame {} returned {}x{}",
            i, annotated.width, annotated.height
        );
    }

    session.set_threshold(0.9)?;
    let frame = VideoFrame::filled(640, 480, [128; 3], 200)?;
    browser.send_frame(frame).await;
    browser.recv_frame().await;

    session.stop();
    info!("Session ended: {}", session.wait_for_terminal().await);
    let stats = display.await?;
    info!(
        "Rendered {} tables, {} hidden",
        stats.rendered, stats.hidden
    );

    if std::env::args().any(|arg| arg == "serve") {
        let factory = WebRtcFactory::new(WebRtcConfig::default());
        let host = WebcamHost::new(roadrtc.clone(), factory).with_session_config(
            roadrtc::SessionConfig {
                relay_override: Some(relay),
                ..Default::default()
            },
        );
        let server = SignalingServer::new(config.signaling_addr, Arc::new(host));

        let serving = server.clone();
        let task = tokio::spawn(async move { serving.start().await });
        info!("Signaling on ws://{} (Ctrl-C to quit)", config.signaling_addr);

        tokio::signal::ctrl_c().await?;
        server.stop();
        task.await??;
    }

    Ok(())
}
