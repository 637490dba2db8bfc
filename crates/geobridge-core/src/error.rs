//! Error types for the GeoClue1 backend

use thiserror::Error;

/// Errors from the session-bus side of the bridge.
///
/// These never escape the daemon: a failed start of the GeoClue1 handshake
/// is logged and the backend returns to idle, per the overall rule that only
/// startup errors (system bus, name, manager export) abort the process.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A proxy call or proxy construction on the session bus failed
    #[error("session bus error: {0}")]
    Bus(#[from] zbus::Error),

    /// A standard org.freedesktop.DBus error was returned
    #[error("bus call failed: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    /// Master.Create() returned an empty object path
    #[error("master returned an empty client path")]
    EmptyClientPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::EmptyClientPath;
        assert_eq!(err.to_string(), "master returned an empty client path");
    }

    #[test]
    fn test_error_from_zbus() {
        let err: BackendError = zbus::Error::InvalidReply.into();
        assert!(matches!(err, BackendError::Bus(_)));
    }
}
