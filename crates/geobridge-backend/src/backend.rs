//! GeoClue1 provider-activation state machine.
//!
//! [`Geoclue1Backend`] owns the session-bus connection and walks the
//! Master -> MasterClient -> Provider handshake when tracking starts:
//!
//! 1. `Master.Create()` returns a per-consumer MasterClient path
//! 2. subscribe to `PositionProviderChanged` on exactly that path
//! 3. `AddReference` on the MasterClient (it implements the base
//!    `org.freedesktop.Geoclue` interface), best effort
//! 4. `SetRequirements` + `PositionStart`
//!
//! Provider selection arrives asynchronously via `PositionProviderChanged`;
//! only then are the provider/Position proxies built and the position and
//! velocity signal streams subscribed. Stopping releases every reference
//! taken, in the order Position, Provider, MasterClient, Master, and is
//! safe to call at any time.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures_util::StreamExt;
use geobridge_core::{BackendError, Position, Velocity};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::proxies::{
    GeoclueProxy, MasterClientProxy, MasterProxy, PositionProxy, VelocityProxy,
    ACCURACY_LEVEL_NONE, GEOCLUE1_SERVICE, RESOURCE_ALL,
};
use crate::velocity::VelocityCache;

/// Session-bus client for the GeoClue1 positioning stack.
///
/// Construct with [`Geoclue1Backend::connect`]; a missing session bus is
/// not fatal - the backend stays inert and `start_tracking` becomes a
/// no-op. Position records are delivered on the channel passed at
/// construction; velocity observations go to the optional observer channel
/// untouched (the merge into positions happens internally).
pub struct Geoclue1Backend {
    connection: Option<Connection>,
    position_tx: mpsc::UnboundedSender<Position>,
    velocity_tx: Option<mpsc::UnboundedSender<Velocity>>,
    velocity_cache: Arc<StdMutex<VelocityCache>>,
    inner: Mutex<TrackingState>,
}

/// Proxies and subscriptions owned while the handshake is live.
#[derive(Default)]
struct TrackingState {
    tracking: bool,
    master: Option<MasterProxy<'static>>,
    master_client: Option<MasterClientProxy<'static>>,
    client_path: Option<OwnedObjectPath>,
    provider: Option<GeoclueProxy<'static>>,
    position: Option<PositionProxy<'static>>,
    provider_watch: Option<JoinHandle<()>>,
    position_watch: Option<JoinHandle<()>>,
    velocity_watch: Option<JoinHandle<()>>,
}

impl Geoclue1Backend {
    /// Opens the session-bus connection and returns the backend handle.
    ///
    /// Connection failure is logged but not propagated: the returned
    /// backend simply never produces position events.
    pub async fn connect(
        position_tx: mpsc::UnboundedSender<Position>,
        velocity_tx: Option<mpsc::UnboundedSender<Velocity>>,
    ) -> Arc<Self> {
        // GeoClue1 runs on the session bus, independently of the
        // system-bus connection that serves the GeoClue2 surface.
        let connection = match Connection::session().await {
            Ok(conn) => {
                info!("connected to session bus");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "failed to connect to session bus, positioning disabled");
                None
            }
        };

        Arc::new(Self::with_connection(connection, position_tx, velocity_tx))
    }

    fn with_connection(
        connection: Option<Connection>,
        position_tx: mpsc::UnboundedSender<Position>,
        velocity_tx: Option<mpsc::UnboundedSender<Velocity>>,
    ) -> Self {
        Self {
            connection,
            position_tx,
            velocity_tx,
            velocity_cache: Arc::new(StdMutex::new(VelocityCache::default())),
            inner: Mutex::new(TrackingState::default()),
        }
    }

    /// Whether a session-bus connection is available.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether the master-client handshake is currently live.
    pub async fn is_tracking(&self) -> bool {
        self.inner.lock().await.tracking
    }

    /// Starts the GeoClue1 handshake. Idempotent; a failure along the way
    /// is logged and the backend returns to idle with all references
    /// released.
    pub async fn start_tracking(self: &Arc<Self>) {
        let Some(conn) = self.connection.clone() else {
            info!("session bus unavailable, not starting tracking");
            return;
        };

        let mut state = self.inner.lock().await;
        if state.tracking {
            debug!("start requested but already tracking");
            return;
        }

        match self.ensure_master_client(&conn, &mut state).await {
            Ok(()) => {
                state.tracking = true;
                info!("tracking started, waiting for provider selection");
            }
            Err(e) => {
                warn!(error = %e, "failed to set up GeoClue1 master client");
                self.destroy_master_client(&mut state).await;
            }
        }
    }

    /// Stops tracking and releases the provider reference chain.
    ///
    /// Runs the full teardown even when already stopped, so lingering
    /// proxies from a half-finished start are cleaned up too.
    pub async fn stop_tracking(&self) {
        let mut state = self.inner.lock().await;
        if state.tracking {
            info!("stopping tracking");
        } else {
            debug!("stop requested while not tracking, cleaning up anyway");
        }
        self.destroy_master_client(&mut state).await;
    }

    /// Walks the start protocol against the master. On success the master
    /// and master-client proxies are stored in `state`; provider discovery
    /// continues asynchronously.
    async fn ensure_master_client(
        self: &Arc<Self>,
        conn: &Connection,
        state: &mut TrackingState,
    ) -> Result<(), BackendError> {
        if state.master.is_some() && state.master_client.is_some() {
            debug!("master client already set up");
            return Ok(());
        }

        let master = match &state.master {
            Some(master) => master.clone(),
            None => {
                let master = MasterProxy::new(conn).await?;
                state.master = Some(master.clone());
                master
            }
        };

        let client_path = master.create().await?;
        if client_path.as_str().is_empty() {
            return Err(BackendError::EmptyClientPath);
        }
        info!(path = %client_path, "created GeoClue1 master client");

        let master_client = MasterClientProxy::builder(conn)
            .path(client_path.clone())?
            .build()
            .await?;

        // Provider announcements for exactly this client object. The watch
        // holds only a weak handle so a dropped backend ends it.
        let mut provider_events = master_client.receive_position_provider_changed().await?;
        let weak = Arc::downgrade(self);
        state.provider_watch = Some(tokio::spawn(async move {
            while let Some(event) = provider_events.next().await {
                let args = match event.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(error = %e, "malformed PositionProviderChanged payload");
                        continue;
                    }
                };
                let Some(backend) = weak.upgrade() else { break };
                backend
                    .handle_provider_changed(
                        args.name(),
                        args.description(),
                        args.service(),
                        args.path(),
                    )
                    .await;
            }
        }));

        state.master_client = Some(master_client.clone());
        state.client_path = Some(client_path.clone());

        // The MasterClient also implements the base Geoclue interface and
        // wants a reference before positioning resources come up. Failure
        // leaves the master's refcount off by one but updates may still
        // flow, so carry on.
        match Self::geoclue_proxy(conn, GEOCLUE1_SERVICE, client_path.as_str()).await {
            Ok(client_geoclue) => {
                if let Err(e) = client_geoclue.add_reference().await {
                    warn!(error = %e, "AddReference on master client failed");
                } else {
                    debug!("AddReference on master client succeeded");
                }
            }
            Err(e) => warn!(error = %e, "could not build Geoclue proxy for master client"),
        }

        master_client
            .set_requirements(ACCURACY_LEVEL_NONE, 0, true, RESOURCE_ALL)
            .await?;
        master_client.position_start().await?;

        // No provider yet is not an error: the master announces its pick
        // via PositionProviderChanged once it has one.
        Ok(())
    }

    /// Reacts to the master selecting (or replacing) a position provider.
    async fn handle_provider_changed(
        self: &Arc<Self>,
        name: &str,
        description: &str,
        service: &str,
        path: &str,
    ) {
        info!(name, description, service, path, "position provider changed");

        // The master emits empty tuples while still deciding.
        if service.is_empty() || path.is_empty() {
            debug!("provider announcement without service/path, ignoring");
            return;
        }

        let Some(conn) = self.connection.clone() else {
            return;
        };

        let mut state = self.inner.lock().await;

        if let Some(watch) = state.position_watch.take() {
            watch.abort();
        }
        if let Some(watch) = state.velocity_watch.take() {
            watch.abort();
        }
        if state.position.take().is_some() {
            debug!("dropped Position proxy of previous provider");
        }

        // Release the outgoing provider before referencing the new one so
        // the pairs stay matched across swaps.
        if let Some(old) = state.provider.take() {
            if let Err(e) = old.remove_reference().await {
                warn!(error = %e, "RemoveReference on outgoing provider failed");
            }
        }

        let provider = match Self::geoclue_proxy(&conn, service, path).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, service, "failed to build provider proxy");
                return;
            }
        };
        if let Err(e) = provider.add_reference().await {
            warn!(error = %e, service, "AddReference on provider failed");
        }
        state.provider = Some(provider);

        let position = match PositionProxy::builder(&conn)
            .destination(service.to_owned())
            .and_then(|builder| builder.path(path.to_owned()))
        {
            Ok(builder) => match builder.build().await {
                Ok(position) => position,
                Err(e) => {
                    warn!(error = %e, service, "failed to build Position proxy");
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, service, "invalid provider service or path");
                return;
            }
        };

        let mut position_events = match position.receive_position_changed().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to subscribe to PositionChanged");
                return;
            }
        };
        let cache = Arc::clone(&self.velocity_cache);
        let tx = self.position_tx.clone();
        state.position_watch = Some(tokio::spawn(async move {
            while let Some(event) = position_events.next().await {
                let args = match event.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(error = %e, "malformed PositionChanged payload");
                        continue;
                    }
                };
                let mut pos = Position::from_signal(
                    *args.timestamp(),
                    *args.latitude(),
                    *args.longitude(),
                    *args.altitude(),
                    args.accuracy().1,
                );
                if let Some((speed, heading, climb)) = cache.lock().unwrap().consume() {
                    pos.speed = speed;
                    pos.heading = heading;
                    pos.climb = climb;
                }
                if tx.send(pos).is_err() {
                    break;
                }
            }
        }));
        state.position = Some(position);

        let velocity = match VelocityProxy::builder(&conn)
            .destination(service.to_owned())
            .and_then(|builder| builder.path(path.to_owned()))
        {
            Ok(builder) => match builder.build().await {
                Ok(velocity) => velocity,
                Err(e) => {
                    warn!(error = %e, service, "failed to build Velocity proxy");
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, service, "invalid provider service or path");
                return;
            }
        };
        let mut velocity_events = match velocity.receive_velocity_changed().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to subscribe to VelocityChanged");
                return;
            }
        };
        let cache = Arc::clone(&self.velocity_cache);
        let observer = self.velocity_tx.clone();
        state.velocity_watch = Some(tokio::spawn(async move {
            while let Some(event) = velocity_events.next().await {
                let args = match event.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(error = %e, "malformed VelocityChanged payload");
                        continue;
                    }
                };
                cache
                    .lock()
                    .unwrap()
                    .store(*args.speed(), *args.direction(), *args.climb());
                if let Some(observer) = &observer {
                    let _ = observer.send(Velocity {
                        speed: *args.speed(),
                        direction: *args.direction(),
                        climb: *args.climb(),
                        timestamp: args.timestamp().to_string(),
                    });
                }
            }
        }));

        info!(service, path, "subscribed to position and velocity updates");
    }

    /// Tears everything down: subscriptions, then references, then proxies
    /// in the order Position, Provider, MasterClient, Master.
    async fn destroy_master_client(&self, state: &mut TrackingState) {
        for watch in [
            state.position_watch.take(),
            state.velocity_watch.take(),
            state.provider_watch.take(),
        ]
        .into_iter()
        .flatten()
        {
            watch.abort();
        }

        state.position = None;

        if let Some(provider) = state.provider.take() {
            if let Err(e) = provider.remove_reference().await {
                warn!(error = %e, "RemoveReference on provider failed");
            } else {
                debug!("RemoveReference on provider succeeded");
            }
        }

        // Drop the MasterClient's own reference through a short-lived
        // Geoclue proxy on the same path.
        if state.master_client.take().is_some() {
            if let (Some(conn), Some(client_path)) =
                (self.connection.as_ref(), state.client_path.as_ref())
            {
                match Self::geoclue_proxy(conn, GEOCLUE1_SERVICE, client_path.as_str()).await {
                    Ok(client_geoclue) => {
                        if let Err(e) = client_geoclue.remove_reference().await {
                            warn!(error = %e, "RemoveReference on master client failed");
                        } else {
                            debug!("RemoveReference on master client succeeded");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not build Geoclue proxy for master client teardown");
                    }
                }
            }
        }

        state.client_path = None;
        state.master = None;
        state.tracking = false;
        debug!("master client torn down");
    }

    async fn geoclue_proxy(
        conn: &Connection,
        service: &str,
        path: &str,
    ) -> zbus::Result<GeoclueProxy<'static>> {
        GeoclueProxy::builder(conn)
            .destination(service.to_owned())?
            .path(path.to_owned())?
            .build()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inert_backend() -> (Arc<Geoclue1Backend>, mpsc::UnboundedReceiver<Position>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Arc::new(Geoclue1Backend::with_connection(None, tx, None));
        (backend, rx)
    }

    #[tokio::test]
    async fn test_inert_backend_start_is_noop() {
        let (backend, _rx) = inert_backend();
        assert!(!backend.is_connected());

        backend.start_tracking().await;
        assert!(!backend.is_tracking().await);
    }

    #[tokio::test]
    async fn test_inert_backend_stop_is_idempotent() {
        let (backend, _rx) = inert_backend();

        backend.stop_tracking().await;
        backend.start_tracking().await;
        backend.stop_tracking().await;
        backend.stop_tracking().await;

        assert!(!backend.is_tracking().await);
    }

    #[tokio::test]
    async fn test_inert_backend_produces_no_positions() {
        let (backend, mut rx) = inert_backend();
        backend.start_tracking().await;
        backend.stop_tracking().await;
        drop(backend);

        // Channel closes without a single report.
        assert!(rx.recv().await.is_none());
    }
}
