//! The per-consumer Client object.

use std::sync::Weak;

use tracing::{debug, info};
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::SignalContext;

use crate::manager::Manager;

/// One exported `org.freedesktop.GeoClue2.Client` object.
///
/// Created by the manager for a specific bus peer. `Start`/`Stop` toggle
/// the `Active` flag and feed the manager's active-client accounting; while
/// active, the client receives each new location through
/// [`notify_location_update`](ClientInterface::notify_location_update).
///
/// The threshold, desktop-id and accuracy properties are accepted and
/// stored but not consulted anywhere.
pub struct ClientInterface {
    path: String,
    peer: String,
    manager: Weak<Manager>,
    active: bool,
    location: OwnedObjectPath,
    distance_threshold: u32,
    time_threshold: u32,
    desktop_id: String,
    requested_accuracy_level: u32,
}

impl ClientInterface {
    pub fn new(path: String, peer: String, manager: Weak<Manager>) -> Self {
        Self {
            path,
            peer,
            manager,
            active: false,
            // "/" means no location yet.
            location: ObjectPath::from_static_str_unchecked("/").into(),
            distance_threshold: 0,
            time_threshold: 0,
            desktop_id: String::new(),
            requested_accuracy_level: 0,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clears the active flag and returns its previous value. Used during
    /// teardown so a concurrent `Stop` cannot account the same transition
    /// twice.
    pub fn take_active(&mut self) -> bool {
        std::mem::take(&mut self.active)
    }

    /// Points the client at a freshly exported location and emits
    /// `LocationUpdated`. Dropped silently while the client is inactive.
    pub async fn notify_location_update(
        &mut self,
        ctxt: &SignalContext<'_>,
        new_path: &ObjectPath<'_>,
    ) {
        if !self.active {
            return;
        }

        let old = std::mem::replace(
            &mut self.location,
            OwnedObjectPath::from(new_path.clone().into_owned()),
        );
        debug!(client = %self.path, old = %old, new = %new_path, "location updated");

        if let Err(e) = self.location_changed(ctxt).await {
            debug!(error = %e, client = %self.path, "failed to emit Location property change");
        }
        if let Err(e) = Self::location_updated(ctxt, &old, new_path).await {
            debug!(error = %e, client = %self.path, "failed to emit LocationUpdated");
        }
    }
}

#[zbus::interface(name = "org.freedesktop.GeoClue2.Client")]
impl ClientInterface {
    /// Activates the client. Already-active clients complete successfully
    /// without side effects.
    async fn start(&mut self, #[zbus(signal_context)] ctxt: SignalContext<'_>) {
        info!(client = %self.path, peer = %self.peer, "Start() called");
        if self.active {
            return;
        }

        self.active = true;
        if let Err(e) = self.active_changed(&ctxt).await {
            debug!(error = %e, client = %self.path, "failed to emit Active property change");
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.client_became_active().await;
        }
    }

    /// Deactivates the client. Symmetric to `Start`.
    async fn stop(&mut self, #[zbus(signal_context)] ctxt: SignalContext<'_>) {
        info!(client = %self.path, peer = %self.peer, "Stop() called");
        if !self.active {
            return;
        }

        self.active = false;
        if let Err(e) = self.active_changed(&ctxt).await {
            debug!(error = %e, client = %self.path, "failed to emit Active property change");
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.client_became_inactive().await;
        }
    }

    /// Path of the most recent location, or "/" before the first update.
    #[zbus(property)]
    async fn location(&self) -> OwnedObjectPath {
        self.location.clone()
    }

    #[zbus(property)]
    async fn distance_threshold(&self) -> u32 {
        self.distance_threshold
    }

    #[zbus(property)]
    async fn set_distance_threshold(&mut self, value: u32) {
        debug!(client = %self.path, value, "DistanceThreshold set");
        self.distance_threshold = value;
    }

    #[zbus(property)]
    async fn time_threshold(&self) -> u32 {
        self.time_threshold
    }

    #[zbus(property)]
    async fn set_time_threshold(&mut self, value: u32) {
        debug!(client = %self.path, value, "TimeThreshold set");
        self.time_threshold = value;
    }

    #[zbus(property)]
    async fn desktop_id(&self) -> &str {
        &self.desktop_id
    }

    #[zbus(property)]
    async fn set_desktop_id(&mut self, value: String) {
        debug!(client = %self.path, desktop_id = %value, "DesktopId set");
        self.desktop_id = value;
    }

    #[zbus(property)]
    async fn requested_accuracy_level(&self) -> u32 {
        self.requested_accuracy_level
    }

    #[zbus(property)]
    async fn set_requested_accuracy_level(&mut self, value: u32) {
        debug!(client = %self.path, value, "RequestedAccuracyLevel set");
        self.requested_accuracy_level = value;
    }

    #[zbus(property)]
    async fn active(&self) -> bool {
        self.active
    }

    /// Emitted on every delivered update with the previous and the new
    /// location path.
    #[zbus(signal)]
    async fn location_updated(
        ctxt: &SignalContext<'_>,
        old: &ObjectPath<'_>,
        new: &ObjectPath<'_>,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> ClientInterface {
        ClientInterface::new(
            "/org/freedesktop/GeoClue2/Client/1".to_string(),
            ":1.42".to_string(),
            Weak::new(),
        )
    }

    #[test]
    fn test_new_client_defaults() {
        let client = test_client();
        assert!(!client.is_active());
        assert_eq!(client.peer(), ":1.42");
        assert_eq!(client.location.as_str(), "/");
        assert_eq!(client.distance_threshold, 0);
        assert_eq!(client.time_threshold, 0);
        assert_eq!(client.requested_accuracy_level, 0);
        assert!(client.desktop_id.is_empty());
    }

    #[test]
    fn test_take_active_clears_flag() {
        let mut client = test_client();
        client.active = true;

        assert!(client.take_active());
        assert!(!client.is_active());
        // Second take reports no transition.
        assert!(!client.take_active());
    }

    #[tokio::test]
    async fn test_thresholds_are_stored_but_unused() {
        let mut client = test_client();
        client.set_distance_threshold(500).await;
        client.set_time_threshold(60).await;
        client.set_desktop_id("maps-app".to_string()).await;
        client.set_requested_accuracy_level(8).await;

        assert_eq!(client.distance_threshold().await, 500);
        assert_eq!(client.time_threshold().await, 60);
        assert_eq!(client.desktop_id().await, "maps-app");
        assert_eq!(client.requested_accuracy_level().await, 8);
        // Accepting the writes never flips activity.
        assert!(!client.is_active());
    }
}
