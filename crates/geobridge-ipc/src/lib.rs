//! Geobridge IPC - the GeoClue2 D-Bus surface
//!
//! Serves the modern location API on the system bus:
//!
//! - `org.freedesktop.GeoClue2.Manager` - the singleton entry point
//!   (GetClient/CreateClient/DeleteClient/AddAgent, `InUse`)
//! - `org.freedesktop.GeoClue2.Client` - one object per consumer, with
//!   Start/Stop and the `LocationUpdated` signal
//! - `org.freedesktop.GeoClue2.Location` - immutable per-update objects
//!
//! The [`Manager`] orchestrates everything: it owns the client registry and
//! the bounded window of recent locations, counts active clients, and gates
//! the GeoClue1 backend on and off through a grace timer so the GPS
//! hardware is not power-cycled by rapid client churn.

pub mod client;
pub mod location;
pub mod manager;
pub mod registry;

pub use client::ClientInterface;
pub use location::LocationInterface;
pub use manager::{Manager, ManagerInterface, AVAILABLE_ACCURACY_LEVEL, BUS_NAME, MANAGER_PATH};
pub use registry::{ClientRegistry, LocationWindow, MAX_STORED_LOCATIONS};
