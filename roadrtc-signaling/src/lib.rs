//! # RoadRTC Signaling
//!
//! WebSocket signaling between the browser page and the server: session
//! start/stop, SDP exchange, threshold and results-table controls, and the
//! live results pushed back to the page.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod protocol;
pub mod server;

// Re-export main types
pub use protocol::{ClientMessage, DetectionRow, ServerMessage};
pub use server::{ConnectionClosed, ConnectionHandle, SessionHost, SignalingServer};
