//! The immutable per-update Location object.

use std::time::{SystemTime, UNIX_EPOCH};

use geobridge_core::Position;

/// One exported `org.freedesktop.GeoClue2.Location` object.
///
/// Fully populated at construction and only then exported on the bus, so
/// observers never read a half-built location. The manager creates a fresh
/// instance per position update instead of mutating an existing one.
pub struct LocationInterface {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    altitude: f64,
    speed: f64,
    heading: f64,
    description: String,
    timestamp: (u64, u64),
}

impl LocationInterface {
    /// Builds a location from a backend position record.
    #[must_use]
    pub fn from_position(pos: &Position) -> Self {
        Self {
            latitude: pos.latitude,
            longitude: pos.longitude,
            accuracy: pos.accuracy,
            altitude: pos.altitude,
            speed: pos.speed,
            heading: pos.heading,
            description: String::new(),
            timestamp: derive_timestamp(&pos.timestamp),
        }
    }
}

#[zbus::interface(name = "org.freedesktop.GeoClue2.Location")]
impl LocationInterface {
    #[zbus(property)]
    async fn latitude(&self) -> f64 {
        self.latitude
    }

    #[zbus(property)]
    async fn longitude(&self) -> f64 {
        self.longitude
    }

    #[zbus(property)]
    async fn accuracy(&self) -> f64 {
        self.accuracy
    }

    #[zbus(property)]
    async fn altitude(&self) -> f64 {
        self.altitude
    }

    #[zbus(property)]
    async fn speed(&self) -> f64 {
        self.speed
    }

    #[zbus(property)]
    async fn heading(&self) -> f64 {
        self.heading
    }

    #[zbus(property)]
    async fn description(&self) -> &str {
        &self.description
    }

    /// `(seconds, microseconds)` since the Unix epoch.
    #[zbus(property)]
    async fn timestamp(&self) -> (u64, u64) {
        self.timestamp
    }
}

/// GeoClue1 delivers the timestamp as a Unix-second integer in a string.
/// Anything unparsable falls back to the current wall clock with
/// microsecond precision.
fn derive_timestamp(raw: &str) -> (u64, u64) {
    match raw.parse::<u64>() {
        Ok(seconds) => (seconds, 0),
        Err(_) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            (now.as_secs(), u64::from(now.subsec_micros()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geobridge_core::UNKNOWN;

    #[test]
    fn test_timestamp_from_integer_string() {
        assert_eq!(derive_timestamp("1700000000"), (1_700_000_000, 0));
        assert_eq!(derive_timestamp("0"), (0, 0));
    }

    #[test]
    fn test_timestamp_fallback_on_garbage() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let (seconds, _) = derive_timestamp("not-a-number");
        assert!(seconds >= before);

        let (seconds, _) = derive_timestamp("");
        assert!(seconds >= before);
    }

    #[test]
    fn test_timestamp_fallback_on_negative() {
        // Signed provider timestamps below zero do not parse as u64.
        let (seconds, _) = derive_timestamp("-5");
        assert!(seconds > 0);
    }

    #[test]
    fn test_from_position_maps_fields() {
        let mut pos = Position::from_signal(1_700_000_000, 59.4, 24.7, 30.0, 5.0);
        pos.speed = 2.5;
        pos.heading = 90.0;

        let location = LocationInterface::from_position(&pos);
        assert_eq!(location.latitude, 59.4);
        assert_eq!(location.longitude, 24.7);
        assert_eq!(location.accuracy, 5.0);
        assert_eq!(location.altitude, 30.0);
        assert_eq!(location.speed, 2.5);
        assert_eq!(location.heading, 90.0);
        assert!(location.description.is_empty());
        assert_eq!(location.timestamp, (1_700_000_000, 0));
    }

    #[test]
    fn test_from_position_keeps_unknown_motion() {
        let pos = Position::from_signal(1_700_000_000, 59.4, 24.7, 30.0, 5.0);
        let location = LocationInterface::from_position(&pos);
        assert_eq!(location.speed, UNKNOWN);
        assert_eq!(location.heading, UNKNOWN);
    }
}
