//! Results display loop
//!
//! Drains the session's result channel and renders each detection list as a
//! table while the "show results" toggle is on.

use crate::config::ViewSettings;
use crate::RoadRtcError;
use async_trait::async_trait;
use roadrtc_core::StateReader;
use roadrtc_media::{DetectionList, RecvOutcome, ResultReceiver};
use roadrtc_signaling::DetectionRow;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// One rendered detection list
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTable {
    /// Sequence number of the frame the rows came from
    pub sequence: u64,
    /// One row per detection, in detector order
    pub rows: Vec<DetectionRow>,
}

impl DetectionTable {
    /// Column headers
    pub const HEADERS: [&'static str; 3] =
        ["Damage Type", "Confidence (%)", "Location (x1, y1, x2, y2)"];

    /// Build the table for `list`
    pub fn from_list(list: &DetectionList) -> Self {
        let rows = list
            .iter()
            .map(|detection| DetectionRow {
                damage_type: detection.label().to_string(),
                confidence: format!("{:.1}", detection.score() * 100.0),
                location: detection.bbox().to_string(),
            })
            .collect();
        Self {
            sequence: list.sequence,
            rows,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for DetectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Self::HEADERS.join(" | "))?;
        for row in &self.rows {
            writeln!(
                f,
                "{} | {} | {}",
                row.damage_type, row.confidence, row.location
            )?;
        }
        Ok(())
    }
}

/// Destination of rendered tables
#[async_trait]
pub trait ResultRenderer: Send {
    /// Render one table
    async fn render(&mut self, table: DetectionTable) -> Result<(), RoadRtcError>;
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayStats {
    /// Tables handed to the renderer
    pub rendered: u64,
    /// Non-empty lists skipped because results were hidden
    pub hidden: u64,
    /// Renderer failures
    pub render_errors: u64,
}

/// Run until the channel closes or the session reaches a terminal state.
///
/// Each iteration waits at most `poll` for a list, so a terminal state is
/// noticed even while no results arrive.
pub async fn run_display_loop<R>(
    mut receiver: ResultReceiver,
    state: StateReader,
    view: ViewSettings,
    mut renderer: R,
    poll: Duration,
) -> DisplayStats
where
    R: ResultRenderer,
{
    let mut stats = DisplayStats::default();

    loop {
        if state.current().is_terminal() {
            debug!("Display loop exiting: session {}", state.current());
            break;
        }

        match receiver.recv_timeout(poll).await {
            RecvOutcome::Item(list) if list.is_empty() => {}
            RecvOutcome::Item(list) => {
                if view.show_results() {
                    let table = DetectionTable::from_list(&list);
                    match renderer.render(table).await {
                        Ok(()) => stats.rendered += 1,
                        Err(e) => {
                            warn!("Failed to render results {}: {}", list.sequence, e);
                            stats.render_errors += 1;
                        }
                    }
                } else {
                    stats.hidden += 1;
                }
            }
            RecvOutcome::Timeout => {}
            RecvOutcome::Closed => {
                debug!("Display loop exiting: result channel closed");
                break;
            }
        }

        tokio::task::yield_now().await;
    }

    stats
}
