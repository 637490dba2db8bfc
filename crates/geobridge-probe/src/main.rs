//! geobridge-probe - exercise the GeoClue2 bridge from a terminal
//!
//! Connects to the system bus, obtains a client from the Manager, starts
//! it, and prints every location update until Ctrl-C. Useful for checking
//! that the bridge (and the GeoClue1 provider behind it) is alive without
//! a full desktop stack.

mod proxies;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use zbus::zvariant::ObjectPath;
use zbus::Connection;

use proxies::{ClientProxy, LocationProxy, ManagerProxy};

#[derive(Debug, Parser)]
#[command(
    name = "geobridge-probe",
    version,
    about = "Probe the GeoClue2 bridge from the command line"
)]
struct Cli {
    /// Desktop id to report to the service
    #[arg(long, default_value = "geobridge-probe")]
    desktop_id: String,
}

async fn print_location(conn: &Connection, path: &ObjectPath<'_>) -> Result<()> {
    if path.as_str() == "/" {
        println!("Location: (none)");
        return Ok(());
    }

    let location = LocationProxy::builder(conn)
        .path(path.clone().into_owned())?
        .build()
        .await
        .context("Failed to create Location proxy")?;

    let latitude = location.latitude().await?;
    let longitude = location.longitude().await?;
    let accuracy = location.accuracy().await?;
    let altitude = location.altitude().await?;
    let speed = location.speed().await?;
    let heading = location.heading().await?;
    let (seconds, _) = location.timestamp().await?;

    println!();
    println!("=== Location update ===");
    println!("Path:        {path}");
    println!("Latitude:    {latitude:.6}");
    println!("Longitude:   {longitude:.6}");
    println!("Accuracy:    {accuracy:.1} m");
    // Unknown values carry sentinels; print only what the provider knows.
    if altitude > -1e308 {
        println!("Altitude:    {altitude:.1} m");
    }
    if speed >= 0.0 {
        println!("Speed:       {speed:.2} m/s ({:.1} km/h)", speed * 3.6);
    }
    if heading >= 0.0 {
        println!("Heading:     {heading:.1} deg from north");
    }
    if seconds > 0 {
        if let Some(timestamp) = chrono::DateTime::from_timestamp(seconds as i64, 0) {
            println!("Timestamp:   {}", timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = Connection::system()
        .await
        .context("Failed to connect to system bus")?;

    let manager = ManagerProxy::new(&conn)
        .await
        .context("Failed to create Manager proxy")?;
    let client_path = manager.get_client().await.context("GetClient() failed")?;
    println!("Client: {client_path}");

    let client = ClientProxy::builder(&conn)
        .path(client_path.clone())?
        .build()
        .await
        .context("Failed to create Client proxy")?;
    client
        .set_desktop_id(&cli.desktop_id)
        .await
        .context("Failed to set DesktopId")?;

    // Subscribe before Start so the first update cannot be missed.
    let mut updates = client
        .receive_location_updated()
        .await
        .context("Failed to subscribe to LocationUpdated")?;
    client.start().await.context("Start() failed")?;

    println!("Service in use: {}", manager.in_use().await?);
    let current = client.location().await?;
    print_location(&conn, &current).await?;

    println!("Waiting for location updates, Ctrl-C to stop");
    loop {
        tokio::select! {
            event = updates.next() => {
                let Some(event) = event else { break };
                let args = event.args()?;
                if let Err(e) = print_location(&conn, args.new_location()).await {
                    eprintln!("Failed to read location: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping");
                break;
            }
        }
    }

    if let Err(e) = client.stop().await {
        eprintln!("Stop() failed: {e}");
    }
    if let Err(e) = manager.delete_client(&client_path).await {
        eprintln!("DeleteClient() failed: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["geobridge-probe"]);
        assert_eq!(cli.desktop_id, "geobridge-probe");
    }

    #[test]
    fn test_cli_desktop_id() {
        let cli = Cli::parse_from(["geobridge-probe", "--desktop-id=maps"]);
        assert_eq!(cli.desktop_id, "maps");
    }
}
