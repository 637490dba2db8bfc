//! Freshness-gated velocity cache.
//!
//! GeoClue1 delivers position and velocity as separate signals. The bridge
//! merges the most recent velocity into outgoing position records, but only
//! for a bounded number of position events - after that the measurement is
//! stale and the motion fields revert to the unknown sentinel.

use geobridge_core::{sanitize, UNKNOWN};

/// Number of position updates for which a stored velocity is considered
/// fresh.
pub const VELOCITY_FRESH_STEPS: u8 = 2;

/// The last velocity measurement, with a countdown of how many more
/// position events may reuse it.
#[derive(Debug, Clone)]
pub struct VelocityCache {
    speed: f64,
    direction: f64,
    climb: f64,
    fresh: u8,
}

impl Default for VelocityCache {
    fn default() -> Self {
        Self {
            speed: UNKNOWN,
            direction: UNKNOWN,
            climb: UNKNOWN,
            fresh: 0,
        }
    }
}

impl VelocityCache {
    /// Stores a new measurement and resets the freshness counter.
    ///
    /// NaN components are normalized to the unknown sentinel on store, so
    /// consumers never observe NaN.
    pub fn store(&mut self, speed: f64, direction: f64, climb: f64) {
        self.speed = sanitize(speed);
        self.direction = sanitize(direction);
        self.climb = sanitize(climb);
        self.fresh = VELOCITY_FRESH_STEPS;
    }

    /// Consumes one freshness step and returns `(speed, direction, climb)`,
    /// or `None` when the measurement has gone stale.
    pub fn consume(&mut self) -> Option<(f64, f64, f64)> {
        if self.fresh == 0 {
            return None;
        }
        self.fresh -= 1;
        Some((self.speed, self.direction, self.climb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_is_stale() {
        let mut cache = VelocityCache::default();
        assert_eq!(cache.consume(), None);
    }

    #[test]
    fn test_velocity_fresh_for_two_positions() {
        let mut cache = VelocityCache::default();
        cache.store(2.5, 90.0, 0.0);

        assert_eq!(cache.consume(), Some((2.5, 90.0, 0.0)));
        assert_eq!(cache.consume(), Some((2.5, 90.0, 0.0)));
        // Third position event after the velocity: stale.
        assert_eq!(cache.consume(), None);
        assert_eq!(cache.consume(), None);
    }

    #[test]
    fn test_store_resets_freshness() {
        let mut cache = VelocityCache::default();
        cache.store(1.0, 0.0, 0.0);
        assert!(cache.consume().is_some());

        cache.store(3.0, 180.0, -0.5);
        assert_eq!(cache.consume(), Some((3.0, 180.0, -0.5)));
        assert_eq!(cache.consume(), Some((3.0, 180.0, -0.5)));
        assert_eq!(cache.consume(), None);
    }

    #[test]
    fn test_nan_components_stored_as_unknown() {
        let mut cache = VelocityCache::default();
        cache.store(f64::NAN, f64::NAN, f64::NAN);
        assert_eq!(cache.consume(), Some((UNKNOWN, UNKNOWN, UNKNOWN)));
    }

    #[test]
    fn test_mixed_nan_components() {
        let mut cache = VelocityCache::default();
        cache.store(2.0, f64::NAN, 0.1);
        assert_eq!(cache.consume(), Some((2.0, UNKNOWN, 0.1)));
    }
}
