//! The Manager singleton: client registry, update broadcast, and
//! backend gating.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use geobridge_backend::Geoclue1Backend;
use geobridge_core::Position;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::message::Header;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::client::ClientInterface;
use crate::location::LocationInterface;
use crate::registry::{ClientRegistry, LocationWindow};

/// Well-known bus name served on the system bus.
pub const BUS_NAME: &str = "org.freedesktop.GeoClue2";

/// Object path of the manager singleton.
pub const MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";

/// Advertised accuracy: 8 is the "exact" level of the GeoClue2 enum.
pub const AVAILABLE_ACCURACY_LEVEL: u32 = 8;

/// Counts clients with `Active = true` and decides when the backend has to
/// be started or scheduled for stop.
#[derive(Debug, Default)]
struct ActiveCounter {
    count: u32,
}

/// Effect of an active-state transition on the GeoClue1 backend.
#[derive(Debug, PartialEq, Eq)]
enum BackendGate {
    /// First active client: start tracking now.
    Start,
    /// Last active client went away: arm the grace timer.
    ScheduleStop,
    /// No backend action.
    Unchanged,
}

impl ActiveCounter {
    fn activate(&mut self) -> BackendGate {
        self.count += 1;
        if self.count == 1 {
            BackendGate::Start
        } else {
            BackendGate::Unchanged
        }
    }

    /// `None` signals an underflow, which the caller logs and suppresses.
    fn deactivate(&mut self) -> Option<BackendGate> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        Some(if self.count == 0 {
            BackendGate::ScheduleStop
        } else {
            BackendGate::Unchanged
        })
    }

    fn count(&self) -> u32 {
        self.count
    }

    fn in_use(&self) -> bool {
        self.count > 0
    }
}

/// A bus-name watch shared by all clients of one peer.
struct PeerWatch {
    clients: u32,
    task: JoinHandle<()>,
}

/// State behind the manager mutex.
///
/// Mutated only from bus handlers and manager-owned tasks; the mutex is
/// never held across an object-server interface lookup, which keeps the
/// Start/Stop handlers free to call back into the manager.
#[derive(Default)]
struct ManagerState {
    registry: ClientRegistry,
    locations: LocationWindow,
    counter: ActiveCounter,
    grace_timer: Option<JoinHandle<()>>,
    peer_watches: HashMap<String, PeerWatch>,
}

/// The bridge orchestrator.
///
/// Owns the system-bus connection, the client registry, the bounded window
/// of exported locations, and the grace timer that keeps the GeoClue1
/// provider alive across rapid client churn.
pub struct Manager {
    connection: Connection,
    backend: Arc<Geoclue1Backend>,
    grace_timeout: Duration,
    state: Mutex<ManagerState>,
}

impl Manager {
    pub fn new(
        connection: Connection,
        backend: Arc<Geoclue1Backend>,
        grace_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            backend,
            grace_timeout,
            state: Mutex::new(ManagerState::default()),
        })
    }

    /// Exports the manager interface at [`MANAGER_PATH`].
    pub async fn serve(self: &Arc<Self>) -> zbus::Result<()> {
        let iface = ManagerInterface {
            manager: Arc::downgrade(self),
        };
        self.connection
            .object_server()
            .at(MANAGER_PATH, iface)
            .await?;
        info!(path = MANAGER_PATH, "manager exported");
        Ok(())
    }

    /// Whether any client is currently active.
    pub async fn in_use(&self) -> bool {
        self.state.lock().await.counter.in_use()
    }

    /// Returns a client path for `peer`, minting a new client unless
    /// `reuse` finds an existing one.
    pub async fn get_or_create_client(
        self: &Arc<Self>,
        peer: &str,
        reuse: bool,
    ) -> zbus::fdo::Result<OwnedObjectPath> {
        let mut state = self.state.lock().await;

        if reuse {
            if let Some(path) = state.registry.existing_for_peer(peer) {
                info!(peer, path, "reusing existing client");
                return to_object_path(path);
            }
        }

        let path = state.registry.mint_path();
        let iface = ClientInterface::new(path.clone(), peer.to_owned(), Arc::downgrade(self));
        if let Err(e) = self.connection.object_server().at(path.as_str(), iface).await {
            warn!(error = %e, path = %path, "failed to export client");
            return Err(zbus::fdo::Error::Failed("failed to create client".into()));
        }

        state.registry.insert(peer, path.clone());
        match state.peer_watches.entry(peer.to_owned()) {
            Entry::Occupied(mut entry) => entry.get_mut().clients += 1,
            Entry::Vacant(entry) => {
                entry.insert(PeerWatch {
                    clients: 1,
                    task: self.spawn_peer_watch(peer.to_owned()),
                });
            }
        }

        info!(peer, path = %path, "created client");
        to_object_path(&path)
    }

    /// Removes a client: both registry indexes, the export, and - when the
    /// client was active - the same accounting as an explicit `Stop`.
    /// Unknown paths are logged and skipped.
    pub async fn remove_client(self: &Arc<Self>, path: &str) {
        let peer = {
            let mut state = self.state.lock().await;
            let Some(peer) = state.registry.remove(path) else {
                warn!(path, "request to remove unknown client path");
                return;
            };

            let mut drop_watch = false;
            if let Some(watch) = state.peer_watches.get_mut(&peer) {
                watch.clients = watch.clients.saturating_sub(1);
                drop_watch = watch.clients == 0;
            }
            if drop_watch {
                if let Some(watch) = state.peer_watches.remove(&peer) {
                    watch.task.abort();
                }
            }
            peer
        };

        // Capture and clear the active flag under the interface lock so a
        // concurrent Stop() cannot account the same transition twice.
        let server = self.connection.object_server();
        let was_active = match server.interface::<_, ClientInterface>(path).await {
            Ok(iface_ref) => iface_ref.get_mut().await.take_active(),
            Err(_) => false,
        };
        if let Err(e) = server.remove::<ClientInterface, _>(path).await {
            debug!(error = %e, path, "client was not exported");
        }

        info!(peer = %peer, path, "removed client");

        if was_active {
            self.client_became_inactive().await;
        }
    }

    /// Called by a client on its false -> true transition.
    pub async fn client_became_active(self: &Arc<Self>) {
        let gate = {
            let mut state = self.state.lock().await;
            if let Some(timer) = state.grace_timer.take() {
                timer.abort();
                debug!("cancelled pending backend stop");
            }
            let gate = state.counter.activate();
            info!(active = state.counter.count(), "client became active");
            gate
        };

        self.update_in_use().await;

        if gate == BackendGate::Start {
            info!("first active client, starting GeoClue1 backend");
            self.backend.start_tracking().await;
        }
    }

    /// Called by a client on its true -> false transition.
    pub async fn client_became_inactive(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            let Some(gate) = state.counter.deactivate() else {
                warn!("client became inactive with count already zero");
                return;
            };
            info!(active = state.counter.count(), "client became inactive");

            if gate == BackendGate::ScheduleStop {
                if let Some(timer) = state.grace_timer.take() {
                    timer.abort();
                }
                let weak = Arc::downgrade(self);
                let grace = self.grace_timeout;
                state.grace_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(manager) = weak.upgrade() {
                        manager.grace_timeout_expired().await;
                    }
                }));
                info!(
                    grace_ms = grace.as_millis() as u64,
                    "no active clients, scheduled backend stop"
                );
            }
        }

        self.update_in_use().await;
    }

    /// Grace timer fired: stop the backend unless a client reactivated in
    /// the meantime.
    async fn grace_timeout_expired(&self) {
        let active = {
            let mut state = self.state.lock().await;
            state.grace_timer = None;
            state.counter.count()
        };

        if active == 0 {
            info!("grace period expired with no active clients, stopping GeoClue1 backend");
            self.backend.stop_tracking().await;
        } else {
            debug!(active, "grace period expired but clients are active again");
        }
    }

    /// Exports a fresh Location for `pos` and fans it out to every active
    /// client, then prunes locations that fell out of the window.
    pub async fn handle_position_update(&self, pos: Position) {
        let path = {
            let mut state = self.state.lock().await;
            state.locations.mint_path()
        };

        // The interface is fully populated before the export, so remote
        // readers never observe a half-built location.
        let location = LocationInterface::from_position(&pos);
        let server = self.connection.object_server();
        if let Err(e) = server.at(path.as_str(), location).await {
            warn!(error = %e, path = %path, "failed to export location");
            return;
        }

        let (evicted, clients, active) = {
            let mut state = self.state.lock().await;
            let evicted = state.locations.push(path.clone());
            (evicted, state.registry.paths(), state.counter.count())
        };

        let Ok(new_path) = ObjectPath::try_from(path.as_str()) else {
            return;
        };
        for client_path in clients {
            let Ok(iface_ref) = server
                .interface::<_, ClientInterface>(client_path.as_str())
                .await
            else {
                continue;
            };
            let ctxt = iface_ref.signal_context();
            iface_ref
                .get_mut()
                .await
                .notify_location_update(ctxt, &new_path)
                .await;
        }
        debug!(path = %path, active, "broadcast location update");

        for old in evicted {
            if server.remove::<LocationInterface, _>(old.as_str()).await.is_ok() {
                debug!(path = %old, "evicted stored location");
            }
        }
    }

    /// Tears down every client, the stored locations, and the manager
    /// export itself.
    pub async fn shutdown(self: &Arc<Self>) {
        info!("shutting down manager");

        let paths = { self.state.lock().await.registry.paths() };
        for path in paths {
            self.remove_client(&path).await;
        }

        let (timer, watches, locations) = {
            let mut state = self.state.lock().await;
            (
                state.grace_timer.take(),
                std::mem::take(&mut state.peer_watches),
                state.locations.drain(),
            )
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        for watch in watches.into_values() {
            watch.task.abort();
        }

        let server = self.connection.object_server();
        for path in locations {
            let _ = server.remove::<LocationInterface, _>(path.as_str()).await;
        }
        let _ = server.remove::<ManagerInterface, _>(MANAGER_PATH).await;
    }

    /// Emits the `InUse` property change.
    async fn update_in_use(&self) {
        match self
            .connection
            .object_server()
            .interface::<_, ManagerInterface>(MANAGER_PATH)
            .await
        {
            Ok(iface_ref) => {
                let ctxt = iface_ref.signal_context();
                if let Err(e) = iface_ref.get().await.in_use_changed(ctxt).await {
                    debug!(error = %e, "failed to emit InUse change");
                }
            }
            Err(e) => debug!(error = %e, "manager interface not exported"),
        }
    }

    /// One watch per distinct peer; ends itself once the peer's name loses
    /// its owner and the clients are cleaned up.
    fn spawn_peer_watch(self: &Arc<Self>, peer: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let conn = self.connection.clone();
        tokio::spawn(async move {
            let dbus = match zbus::fdo::DBusProxy::new(&conn).await {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!(error = %e, peer, "failed to create bus proxy for peer watch");
                    return;
                }
            };
            let mut owner_changes = match dbus
                .receive_name_owner_changed_with_args(&[(0, peer.as_str())])
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, peer, "failed to subscribe to peer owner changes");
                    return;
                }
            };

            while let Some(event) = owner_changes.next().await {
                let Ok(args) = event.args() else { continue };
                if args.new_owner().is_none() {
                    info!(peer, "peer vanished");
                    let Some(manager) = weak.upgrade() else { break };
                    manager.handle_peer_vanished(&peer).await;
                    break;
                }
            }
        })
    }

    /// Removes every client owned by a vanished peer.
    async fn handle_peer_vanished(self: &Arc<Self>, peer: &str) {
        let paths = { self.state.lock().await.registry.paths_for_peer(peer) };
        for path in paths {
            self.remove_client(&path).await;
        }
    }
}

fn to_object_path(path: &str) -> zbus::fdo::Result<OwnedObjectPath> {
    OwnedObjectPath::try_from(path.to_owned())
        .map_err(|_| zbus::fdo::Error::Failed("invalid client path".into()))
}

/// The exported `org.freedesktop.GeoClue2.Manager` interface.
///
/// Holds only a weak handle; once the manager is gone, calls fail with a
/// generic error instead of panicking.
pub struct ManagerInterface {
    manager: Weak<Manager>,
}

impl ManagerInterface {
    fn manager(&self) -> zbus::fdo::Result<Arc<Manager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| zbus::fdo::Error::Failed("manager is shutting down".into()))
    }
}

#[zbus::interface(name = "org.freedesktop.GeoClue2.Manager")]
impl ManagerInterface {
    /// Returns a client for the caller, reusing one when the peer already
    /// has it.
    async fn get_client(
        &self,
        #[zbus(header)] header: Header<'_>,
    ) -> zbus::fdo::Result<OwnedObjectPath> {
        let manager = self.manager()?;
        let peer = caller(&header)?;
        info!(peer = %peer, "GetClient() called");
        manager.get_or_create_client(&peer, true).await
    }

    /// Always mints a new client for the caller.
    async fn create_client(
        &self,
        #[zbus(header)] header: Header<'_>,
    ) -> zbus::fdo::Result<OwnedObjectPath> {
        let manager = self.manager()?;
        let peer = caller(&header)?;
        info!(peer = %peer, "CreateClient() called");
        manager.get_or_create_client(&peer, false).await
    }

    /// Removes the named client.
    async fn delete_client(&self, client: OwnedObjectPath) -> zbus::fdo::Result<()> {
        let manager = self.manager()?;
        info!(path = %client, "DeleteClient() called");
        manager.remove_client(client.as_str()).await;
        Ok(())
    }

    /// Accepted and ignored; no authorization is enforced.
    async fn add_agent(&self, id: String) -> zbus::fdo::Result<()> {
        info!(id, "AddAgent() called, ignoring");
        Ok(())
    }

    #[zbus(property)]
    async fn in_use(&self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.in_use().await,
            None => false,
        }
    }

    #[zbus(property)]
    async fn available_accuracy_level(&self) -> u32 {
        AVAILABLE_ACCURACY_LEVEL
    }
}

fn caller(header: &Header<'_>) -> zbus::fdo::Result<String> {
    header
        .sender()
        .map(|name| name.to_string())
        .ok_or_else(|| zbus::fdo::Error::Failed("caller has no bus name".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(BUS_NAME, "org.freedesktop.GeoClue2");
        assert_eq!(MANAGER_PATH, "/org/freedesktop/GeoClue2/Manager");
        assert_eq!(AVAILABLE_ACCURACY_LEVEL, 8);
    }

    #[test]
    fn test_counter_first_activation_starts_backend() {
        let mut counter = ActiveCounter::default();
        assert_eq!(counter.activate(), BackendGate::Start);
        assert_eq!(counter.activate(), BackendGate::Unchanged);
        assert_eq!(counter.count(), 2);
        assert!(counter.in_use());
    }

    #[test]
    fn test_counter_last_deactivation_schedules_stop() {
        let mut counter = ActiveCounter::default();
        counter.activate();
        counter.activate();

        assert_eq!(counter.deactivate(), Some(BackendGate::Unchanged));
        assert_eq!(counter.deactivate(), Some(BackendGate::ScheduleStop));
        assert!(!counter.in_use());
    }

    #[test]
    fn test_counter_underflow_is_reported() {
        let mut counter = ActiveCounter::default();
        assert_eq!(counter.deactivate(), None);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_in_use_tracks_count() {
        let mut counter = ActiveCounter::default();
        assert!(!counter.in_use());
        counter.activate();
        assert!(counter.in_use());
        counter.deactivate();
        assert!(!counter.in_use());
    }

    #[test]
    fn test_to_object_path() {
        let path = to_object_path("/org/freedesktop/GeoClue2/Client/1").unwrap();
        assert_eq!(path.as_str(), "/org/freedesktop/GeoClue2/Client/1");
        assert!(to_object_path("not a path").is_err());
    }
}
