//! ICE configuration and session descriptions handed to the media transport

use crate::relay::RelayEndpoint;
use serde::{Deserialize, Serialize};

/// One ICE server entry, as understood by browser peer connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs, e.g. `stun:1.2.3.4:3478`
    pub urls: Vec<String>,
}

/// ICE configuration for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfiguration {
    /// Relay servers used for NAT traversal
    pub ice_servers: Vec<IceServer>,
}

impl IceConfiguration {
    /// Configuration with a single STUN relay
    pub fn from_relay(relay: &RelayEndpoint) -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec![relay.ice_url()],
            }],
        }
    }

    /// All configured URLs, flattened
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.ice_servers
            .iter()
            .flat_map(|server| server.urls.iter().map(String::as_str))
    }

    /// Whether at least one relay URL is configured
    pub fn is_empty(&self) -> bool {
        self.urls().next().is_none()
    }
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the initiating peer
    Offer,
    /// Answer from the responding peer
    Answer,
}

/// SDP blob exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}
