//! Position and velocity records in the GeoClue1 coordinate convention.
//!
//! GeoClue1 providers report latitude/longitude/altitude as doubles, a
//! horizontal accuracy in meters, and an integer Unix timestamp. Motion
//! fields (speed, heading, climb) may be unknown, in which case they carry
//! the [`UNKNOWN`] sentinel rather than an Option - that is the convention
//! the GeoClue2 Location interface expects on the wire.

/// Sentinel for "value not known" in position and velocity fields.
pub const UNKNOWN: f64 = -1.0;

/// Replaces NaN with the [`UNKNOWN`] sentinel.
///
/// GeoClue1 providers occasionally report NaN for motion fields they cannot
/// measure; consumers of the GeoClue2 surface expect `-1.0` instead.
#[must_use]
pub fn sanitize(value: f64) -> f64 {
    if value.is_nan() {
        UNKNOWN
    } else {
        value
    }
}

/// A single position report, normalized from a GeoClue1 `PositionChanged`
/// signal with velocity merged in when fresh.
///
/// Immutable once constructed. The timestamp is the provider's integer
/// Unix-second timestamp rendered as a decimal string; consumers parse it
/// back and fall back to the wall clock if it does not parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Speed in meters per second, [`UNKNOWN`] when stale
    pub speed: f64,
    /// Heading in degrees from north, [`UNKNOWN`] when stale
    pub heading: f64,
    /// Rate of climb in meters per second, [`UNKNOWN`] when stale
    pub climb: f64,
    /// Unix seconds as a decimal string, as delivered by the provider
    pub timestamp: String,
}

impl Position {
    /// Builds a position from the raw fields of a `PositionChanged` signal,
    /// with all motion fields unknown.
    #[must_use]
    pub fn from_signal(timestamp: i32, latitude: f64, longitude: f64, altitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            accuracy,
            speed: UNKNOWN,
            heading: UNKNOWN,
            climb: UNKNOWN,
            timestamp: timestamp.to_string(),
        }
    }
}

/// A raw velocity observation, forwarded to observers as received.
///
/// Unlike the velocity merged into [`Position`], observation values are not
/// sanitized - the observer sees exactly what the provider reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Velocity {
    /// Speed in meters per second
    pub speed: f64,
    /// Direction of travel in degrees from north
    pub direction: f64,
    /// Rate of climb in meters per second
    pub climb: f64,
    /// Unix seconds as a decimal string
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_values_through() {
        assert_eq!(sanitize(2.5), 2.5);
        assert_eq!(sanitize(0.0), 0.0);
        assert_eq!(sanitize(-1.0), -1.0);
    }

    #[test]
    fn test_sanitize_replaces_nan() {
        assert_eq!(sanitize(f64::NAN), UNKNOWN);
    }

    #[test]
    fn test_position_from_signal_motion_unknown() {
        let pos = Position::from_signal(1_700_000_000, 59.4, 24.7, 30.0, 5.0);
        assert_eq!(pos.latitude, 59.4);
        assert_eq!(pos.longitude, 24.7);
        assert_eq!(pos.altitude, 30.0);
        assert_eq!(pos.accuracy, 5.0);
        assert_eq!(pos.speed, UNKNOWN);
        assert_eq!(pos.heading, UNKNOWN);
        assert_eq!(pos.climb, UNKNOWN);
        assert_eq!(pos.timestamp, "1700000000");
    }
}
