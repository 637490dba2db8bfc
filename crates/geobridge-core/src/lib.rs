//! Geobridge Core - Domain types for the GeoClue2 bridge
//!
//! This crate contains the types shared by the GeoClue1 backend and the
//! GeoClue2 D-Bus surface:
//! - [`Position`] and [`Velocity`] records as reported by GeoClue1
//! - The `-1.0` "unknown" sentinel and NaN sanitization
//! - [`BridgeConfig`] daemon configuration
//! - [`BackendError`] for session-bus failures

pub mod config;
pub mod error;
pub mod position;

pub use config::BridgeConfig;
pub use error::BackendError;
pub use position::{sanitize, Position, Velocity, UNKNOWN};
