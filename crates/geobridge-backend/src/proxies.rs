//! zbus proxies for the GeoClue1 D-Bus interfaces.
//!
//! All of these live on the **session** bus. `Master` and `MasterClient`
//! are served by geoclue-master under the well-known name
//! `org.freedesktop.Geoclue.Master`; `Geoclue`, `Position` and `Velocity`
//! are implemented both by providers (at the service+path announced via
//! `PositionProviderChanged`) and, for the base `Geoclue` interface, by the
//! MasterClient object itself.

use zbus::zvariant::OwnedObjectPath;

/// Well-known name of the GeoClue1 master service.
pub const GEOCLUE1_SERVICE: &str = "org.freedesktop.Geoclue.Master";

/// Object path of the GeoClue1 master singleton.
pub const GEOCLUE1_MASTER_PATH: &str = "/org/freedesktop/Geoclue/Master";

/// Accuracy level "none" - the master picks whatever provider it has.
pub const ACCURACY_LEVEL_NONE: i32 = 0;

/// All positioning resources (network, cell, GPS, ...) allowed.
pub const RESOURCE_ALL: i32 = (1 << 10) - 1;

/// The GeoClue1 master singleton.
#[zbus::proxy(
    interface = "org.freedesktop.Geoclue.Master",
    default_service = "org.freedesktop.Geoclue.Master",
    default_path = "/org/freedesktop/Geoclue/Master"
)]
pub trait Master {
    /// Creates a per-consumer MasterClient object and returns its path.
    fn create(&self) -> zbus::Result<OwnedObjectPath>;
}

/// The per-consumer client object returned by `Master.Create()`.
///
/// Also implements the base `org.freedesktop.Geoclue` interface; reference
/// calls on it go through [`GeoclueProxy`] at the same path.
#[zbus::proxy(
    interface = "org.freedesktop.Geoclue.MasterClient",
    default_service = "org.freedesktop.Geoclue.Master"
)]
pub trait MasterClient {
    /// Declares what this consumer needs from a provider.
    fn set_requirements(
        &self,
        accuracy_level: i32,
        time: i32,
        require_updates: bool,
        allowed_resources: i32,
    ) -> zbus::Result<()>;

    /// Asks the master to select a position provider and start it.
    fn position_start(&self) -> zbus::Result<()>;

    /// Emitted when the master selects (or deselects) a position provider.
    /// `service` and `path` may be empty while the master is deciding.
    #[zbus(signal)]
    fn position_provider_changed(
        &self,
        name: String,
        description: String,
        service: String,
        path: String,
    ) -> zbus::Result<()>;
}

/// The base GeoClue1 interface carrying the provider reference count.
#[zbus::proxy(interface = "org.freedesktop.Geoclue")]
pub trait Geoclue {
    /// Takes a reference on the object, keeping its hardware powered.
    fn add_reference(&self) -> zbus::Result<()>;

    /// Releases a reference taken with `AddReference`.
    fn remove_reference(&self) -> zbus::Result<()>;
}

/// Position reports from a selected provider.
#[zbus::proxy(interface = "org.freedesktop.Geoclue.Position")]
pub trait Position {
    /// `(fields, unix-time, lat, lon, alt, (accuracy-level, horizontal, vertical))`
    #[zbus(signal)]
    fn position_changed(
        &self,
        fields: i32,
        timestamp: i32,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        accuracy: (i32, f64, f64),
    ) -> zbus::Result<()>;
}

/// Velocity reports from a selected provider.
#[zbus::proxy(interface = "org.freedesktop.Geoclue.Velocity")]
pub trait Velocity {
    /// `(fields, unix-time, speed, direction, climb)`
    #[zbus(signal)]
    fn velocity_changed(
        &self,
        fields: i32,
        timestamp: i32,
        speed: f64,
        direction: f64,
        climb: f64,
    ) -> zbus::Result<()>;
}
