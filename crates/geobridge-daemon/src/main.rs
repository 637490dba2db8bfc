//! geobridged - GeoClue2 to GeoClue1 bridge daemon
//!
//! Exposes the modern `org.freedesktop.GeoClue2` API on the system bus
//! while driving a legacy GeoClue1 positioning stack on the session bus.
//! Applications keep talking GeoClue2; the GPS is actually managed by a
//! GeoClue1 provider that would otherwise have no clients left.
//!
//! # Startup order
//!
//! 1. Connect to the system bus and acquire the well-known name (fatal)
//! 2. Export the Manager object (fatal)
//! 3. Connect the GeoClue1 backend on the session bus (non-fatal; the
//!    bridge stays up and simply produces no positions)
//! 4. Run until SIGINT/SIGTERM, then tear down clients first and the
//!    GeoClue1 reference chain last.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use geobridge_backend::Geoclue1Backend;
use geobridge_core::{config::DEFAULT_GRACE_TIMEOUT_MS, BridgeConfig};
use geobridge_ipc::{Manager, BUS_NAME};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "geobridged", version, about = "GeoClue2 to GeoClue1 bridge daemon")]
struct Cli {
    /// Enable verbose logging
    #[arg(long)]
    debug: bool,

    /// Milliseconds to keep the GeoClue1 provider alive after the last
    /// active client stops
    #[arg(
        long = "grace-timeout",
        value_name = "MILLISECONDS",
        default_value_t = DEFAULT_GRACE_TIMEOUT_MS
    )]
    grace_timeout: u64,
}

/// Waits for SIGTERM or SIGINT and cancels the token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BridgeConfig::new(cli.debug, cli.grace_timeout);

    let default_level = if config.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("geobridged starting");

    // System-bus connection and the well-known name; both are fatal. The
    // name is acquired before any object is exported, matching the
    // activation files that point at this daemon.
    let connection = zbus::connection::Builder::system()
        .context("Failed to connect to system bus")?
        .name(BUS_NAME)
        .context("Invalid bus name")?
        .build()
        .await
        .with_context(|| format!("Failed to acquire bus name {BUS_NAME}"))?;
    info!(name = BUS_NAME, "acquired bus name");

    // GeoClue1 lives on the session bus; losing it is not fatal.
    let (position_tx, mut position_rx) = mpsc::unbounded_channel();
    let (velocity_tx, mut velocity_rx) = mpsc::unbounded_channel();
    let backend = Geoclue1Backend::connect(position_tx, Some(velocity_tx)).await;
    if !backend.is_connected() {
        error!("GeoClue1 session bus unavailable; serving the API without position updates");
    }

    let manager = Manager::new(connection.clone(), Arc::clone(&backend), config.grace_timeout);
    manager
        .serve()
        .await
        .context("Failed to register the Manager object")?;

    // Fan positions out to active clients.
    let dispatch_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Some(pos) = position_rx.recv().await {
            debug!(
                latitude = pos.latitude,
                longitude = pos.longitude,
                accuracy = pos.accuracy,
                speed = pos.speed,
                heading = pos.heading,
                "position update"
            );
            dispatch_manager.handle_position_update(pos).await;
        }
    });

    // Velocity observations are merged into positions inside the backend;
    // this consumer only logs them.
    tokio::spawn(async move {
        while let Some(vel) = velocity_rx.recv().await {
            debug!(
                speed = vel.speed,
                direction = vel.direction,
                climb = vel.climb,
                "velocity update"
            );
        }
    });

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    info!(
        grace_ms = config.grace_timeout.as_millis() as u64,
        "bridge ready, waiting for client connections"
    );

    shutdown.cancelled().await;

    info!("shutting down");
    manager.shutdown().await;
    backend.stop_tracking().await;

    info!("geobridged shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["geobridged"]);
        assert!(!cli.debug);
        assert_eq!(cli.grace_timeout, 15_000);
    }

    #[test]
    fn test_cli_debug_flag() {
        let cli = Cli::parse_from(["geobridged", "--debug"]);
        assert!(cli.debug);
    }

    #[test]
    fn test_cli_grace_timeout() {
        let cli = Cli::parse_from(["geobridged", "--grace-timeout=2000"]);
        assert_eq!(cli.grace_timeout, 2_000);

        let cli = Cli::parse_from(["geobridged", "--grace-timeout", "500"]);
        assert_eq!(cli.grace_timeout, 500);
    }

    #[test]
    fn test_cli_rejects_short_options() {
        assert!(Cli::try_parse_from(["geobridged", "-d"]).is_err());
        assert!(Cli::try_parse_from(["geobridged", "-g", "100"]).is_err());
    }

    #[test]
    fn test_cli_rejects_garbage_timeout() {
        assert!(Cli::try_parse_from(["geobridged", "--grace-timeout=soon"]).is_err());
    }

    #[test]
    fn test_cancellation_token_propagates() {
        let token = CancellationToken::new();
        let child = token.child_token();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
