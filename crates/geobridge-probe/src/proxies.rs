//! zbus proxies for the GeoClue2 interfaces served by the bridge.
//!
//! Only the pieces the probe exercises: client acquisition, Start/Stop,
//! the `LocationUpdated` signal, and the Location read-only properties.

use zbus::zvariant::{ObjectPath, OwnedObjectPath};

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
pub trait Manager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;

    fn delete_client(&self, client: &ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn in_use(&self) -> zbus::Result<bool>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2"
)]
pub trait Client {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn location(&self) -> zbus::Result<OwnedObjectPath>;

    #[zbus(property)]
    fn set_desktop_id(&self, value: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn location_updated(
        &self,
        old_location: OwnedObjectPath,
        new_location: OwnedObjectPath,
    ) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2"
)]
pub trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn altitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn speed(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn heading(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn timestamp(&self) -> zbus::Result<(u64, u64)>;
}
