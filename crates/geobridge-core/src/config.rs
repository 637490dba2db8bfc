//! Daemon configuration.
//!
//! The bridge is configured entirely from the command line; this struct is
//! the typed form handed to the manager and backend.

use std::time::Duration;

/// Default grace period before the GeoClue1 provider is released once the
/// last active client stops.
pub const DEFAULT_GRACE_TIMEOUT_MS: u64 = 15_000;

/// Runtime configuration for the bridge daemon.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Verbose logging requested via `--debug`
    pub debug: bool,
    /// How long to keep the GeoClue1 provider referenced after the active
    /// client count drops to zero
    pub grace_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            grace_timeout: Duration::from_millis(DEFAULT_GRACE_TIMEOUT_MS),
        }
    }
}

impl BridgeConfig {
    /// Builds a configuration from parsed command-line values.
    #[must_use]
    pub fn new(debug: bool, grace_timeout_ms: u64) -> Self {
        Self {
            debug,
            grace_timeout: Duration::from_millis(grace_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_timeout() {
        let config = BridgeConfig::default();
        assert_eq!(config.grace_timeout, Duration::from_millis(15_000));
        assert!(!config.debug);
    }

    #[test]
    fn test_new_from_cli_values() {
        let config = BridgeConfig::new(true, 2_000);
        assert!(config.debug);
        assert_eq!(config.grace_timeout, Duration::from_millis(2_000));
    }
}
