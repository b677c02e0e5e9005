//! Structured logging setup

use crate::RoadRtcError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g. `"info"` or
/// `"roadrtc=debug"`) is used. Calling this again once a subscriber is
/// installed is a no-op.
pub fn init_logging(default_directive: &str) -> Result<(), RoadRtcError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            RoadRtcError::InvalidConfiguration {
                message: format!("log directive {:?}: {}", default_directive, e),
            }
        })?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        debug!("Logging already initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_logging("info").is_ok());
        assert!(init_logging("roadrtc=debug").is_ok());
    }

    #[test]
    fn test_bad_directive_rejected() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_logging("roadrtc=loudest").is_err());
        }
    }
}
