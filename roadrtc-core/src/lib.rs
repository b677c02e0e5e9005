//! # RoadRTC Core
//!
//! Foundational pieces shared by every RoadRTC crate: the error type, the
//! session state machine, ICE configuration types and relay (STUN) endpoint
//! selection.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ice;
pub mod relay;
pub mod state;

// Re-export main types
pub use error::RoadRtcError;
pub use ice::{IceConfiguration, IceServer, SdpType, SessionDescription};
pub use relay::{
    Dataset, GeoPoint, HttpRelayDirectory, NetworkPathSelector, RelayDirectory,
    RelayDiscoveryConfig, RelayEndpoint, RelaySelectionError,
};
pub use state::{state_channel, SessionState, StateReader, StateWriter};
