//! Geobridge Backend - GeoClue1 session-bus client
//!
//! Drives the legacy GeoClue1 positioning stack on behalf of the GeoClue2
//! surface:
//! - `Master.Create()` to obtain a per-consumer MasterClient
//! - `SetRequirements` + `PositionStart` to request updates
//! - `PositionProviderChanged` to discover and swap the selected provider
//! - `AddReference`/`RemoveReference` bookkeeping so the provider powers
//!   the hardware only while the bridge has active clients
//!
//! Position reports (with freshness-gated velocity merged in) are delivered
//! upstream over an mpsc channel; the [`Geoclue1Backend`] itself never
//! touches the GeoClue2 side.

pub mod backend;
pub mod proxies;
pub mod velocity;

pub use backend::Geoclue1Backend;
pub use velocity::{VelocityCache, VELOCITY_FRESH_STEPS};
