//! Configuration types and defaults

use crate::RoadRtcError;
use roadrtc_core::{RelayDiscoveryConfig, RelayEndpoint};
use roadrtc_media::{AdapterConfig, ResultChannelConfig, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding [`GlobalConfig::models_dir`]
pub const ENV_MODELS_DIR: &str = "ROADRTC_MODELS_DIR";
/// Environment variable overriding [`GlobalConfig::signaling_addr`]
pub const ENV_SIGNALING_ADDR: &str = "ROADRTC_SIGNALING_ADDR";
/// Environment variable overriding the relay request timeout, in seconds
pub const ENV_RELAY_TIMEOUT_SECS: &str = "ROADRTC_RELAY_TIMEOUT_SECS";

/// Global RoadRTC configuration
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Directory holding `<model>.pt` files
    pub models_dir: PathBuf,
    /// Address the signaling server binds to
    pub signaling_addr: SocketAddr,
    /// Model used when a session does not name one
    pub default_model: String,
    /// Relay discovery settings
    pub relay: RelayDiscoveryConfig,
    /// Log filter used when `RUST_LOG` is unset
    pub log_directive: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            signaling_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            default_model: DEFAULT_MODEL.to_string(),
            relay: RelayDiscoveryConfig::default(),
            log_directive: "info".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Defaults overridden by `ROADRTC_*` environment variables
    pub fn from_env() -> Result<Self, RoadRtcError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RoadRtcError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_MODELS_DIR) {
            config.models_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup(ENV_SIGNALING_ADDR) {
            config.signaling_addr =
                addr.parse()
                    .map_err(|e| RoadRtcError::InvalidConfiguration {
                        message: format!("{}={:?}: {}", ENV_SIGNALING_ADDR, addr, e),
                    })?;
        }
        if let Some(secs) = lookup(ENV_RELAY_TIMEOUT_SECS) {
            let secs: u64 = secs
                .parse()
                .map_err(|e| RoadRtcError::InvalidConfiguration {
                    message: format!("{}={:?}: {}", ENV_RELAY_TIMEOUT_SECS, secs, e),
                })?;
            config.relay.request_timeout = Duration::from_secs(secs);
            config.relay.overall_timeout = config.relay.overall_timeout.max(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields
    pub fn validate(&self) -> Result<(), RoadRtcError> {
        if self.default_model.trim().is_empty() {
            return Err(RoadRtcError::MissingConfiguration {
                field: "default_model".to_string(),
            });
        }
        if self.relay.request_timeout.is_zero() || self.relay.overall_timeout.is_zero() {
            return Err(RoadRtcError::InvalidConfiguration {
                message: "relay discovery timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Detection confidence threshold as offered by the UI slider.
///
/// Always within [0, 1] and snapped to multiples of [`ConfidenceThreshold::STEP`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    /// Slider minimum
    pub const MIN: f32 = 0.0;
    /// Slider maximum
    pub const MAX: f32 = 1.0;
    /// Slider step
    pub const STEP: f32 = 0.05;
    /// Initial slider position
    pub const DEFAULT: ConfidenceThreshold = ConfidenceThreshold(0.5);

    /// Snap `value` to the nearest step; values outside [0, 1] are rejected
    pub fn new(value: f32) -> Result<Self, RoadRtcError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(RoadRtcError::InvalidConfiguration {
                message: format!("confidence threshold {} outside [0, 1]", value),
            });
        }
        let steps = (value / Self::STEP).round();
        Ok(Self((steps * Self::STEP).clamp(Self::MIN, Self::MAX)))
    }

    /// Threshold value
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f32> for ConfidenceThreshold {
    type Error = RoadRtcError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceThreshold> for f32 {
    fn from(threshold: ConfidenceThreshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for ConfidenceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Results-table toggle shared between the UI connection and the display loop
#[derive(Debug, Clone)]
pub struct ViewSettings {
    show_results: Arc<AtomicBool>,
}

impl ViewSettings {
    /// Settings with the table initially shown or hidden
    pub fn new(show_results: bool) -> Self {
        Self {
            show_results: Arc::new(AtomicBool::new(show_results)),
        }
    }

    /// Whether results should be rendered
    pub fn show_results(&self) -> bool {
        self.show_results.load(Ordering::Relaxed)
    }

    /// Show or hide the results table
    pub fn set_show_results(&self, show: bool) {
        self.show_results.store(show, Ordering::Relaxed);
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Session-specific configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model key; the global default when `None`
    pub model: Option<String>,
    /// Initial confidence threshold
    pub threshold: ConfidenceThreshold,
    /// Deadline for transport negotiation
    pub negotiation_timeout: Duration,
    /// Result channel sizing
    pub results: ResultChannelConfig,
    /// Detection adapter settings
    pub adapter: AdapterConfig,
    /// Use this relay instead of running discovery
    pub relay_override: Option<RelayEndpoint>,
    /// Bounded wait of one display loop iteration
    pub display_poll: Duration,
    /// Whether the results table starts visible
    pub show_results: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            threshold: ConfidenceThreshold::DEFAULT,
            negotiation_timeout: Duration::from_secs(10),
            results: ResultChannelConfig::default(),
            adapter: AdapterConfig::default(),
            relay_override: None,
            display_poll: Duration::from_millis(100),
            show_results: true,
        }
    }
}

impl SessionConfig {
    /// Only the newest results are kept; suited to slow UI links
    pub fn latest_results_only() -> Self {
        Self {
            results: ResultChannelConfig::latest_only(),
            ..Default::default()
        }
    }

    /// Check field values
    pub fn validate(&self) -> Result<(), RoadRtcError> {
        if self.negotiation_timeout.is_zero() {
            return Err(RoadRtcError::InvalidConfiguration {
                message: "negotiation timeout must be positive".to_string(),
            });
        }
        if self.display_poll.is_zero() {
            return Err(RoadRtcError::InvalidConfiguration {
                message: "display poll interval must be positive".to_string(),
            });
        }
        self.results.validate()?;
        self.adapter.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_threshold_snaps_to_step() {
        assert_eq!(ConfidenceThreshold::new(0.52).unwrap().value(), 0.5);
        assert!((ConfidenceThreshold::new(0.53).unwrap().value() - 0.55).abs() < 1e-6);
        assert_eq!(ConfidenceThreshold::new(1.0).unwrap().value(), 1.0);
        assert_eq!(ConfidenceThreshold::new(0.0).unwrap().value(), 0.0);
        assert!(ConfidenceThreshold::new(1.2).is_err());
        assert!(ConfidenceThreshold::new(f32::NAN).is_err());
        assert_eq!(ConfidenceThreshold::default().value(), 0.5);
    }

    #[test]
    fn test_threshold_serde() {
        let threshold: ConfidenceThreshold = serde_json::from_str("0.5").unwrap();
        assert_eq!(threshold, ConfidenceThreshold::DEFAULT);
        assert!(serde_json::from_str::<ConfidenceThreshold>("3.0").is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_MODELS_DIR, "/srv/models"),
            (ENV_SIGNALING_ADDR, "0.0.0.0:9000"),
            (ENV_RELAY_TIMEOUT_SECS, "3"),
        ]
        .into_iter()
        .collect();

        let config =
            GlobalConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.signaling_addr.port(), 9000);
        assert_eq!(config.relay.request_timeout, Duration::from_secs(3));
        assert_eq!(config.relay.overall_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let err = GlobalConfig::from_lookup(|key| {
            (key == ENV_SIGNALING_ADDR).then(|| "not-an-address".to_string())
        })
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");

        let err = GlobalConfig::from_lookup(|key| {
            (key == ENV_RELAY_TIMEOUT_SECS).then(|| "0".to_string())
        })
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert_eq!(SessionConfig::latest_results_only().results.capacity, 1);

        let config = SessionConfig {
            negotiation_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
