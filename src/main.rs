//! flightcast CLI
//!
//! Polls the upstream feed for a set of in-process viewers and reports what
//! each of them ends up tracking.

use clap::{Parser, Subcommand};
use flightcast::{
    auth::{OAuthConfig, OAuthTokenProvider, StaticToken, TokenProvider},
    bounds::GeographicBounds,
    broadcast::{BroadcastConfig, BroadcastService},
    client::{ClientConfig, OpenSkyClient, OPENSKY_API_URL},
    protocol,
    viewer::{Viewer, ViewerConfig, ViewerHandle},
    viewport::MAX_VISIBLE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "flightcast")]
#[command(about = "Shared-poll live aircraft feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed and keep in-process viewers up to date
    Watch {
        /// OAuth client id (anonymous access when omitted)
        #[arg(long, env = "OPENSKY_CLIENT_ID")]
        client_id: Option<String>,

        /// OAuth client secret
        #[arg(long, env = "OPENSKY_CLIENT_SECRET")]
        client_secret: Option<String>,

        /// API root
        #[arg(long, default_value = OPENSKY_API_URL)]
        api_url: String,

        /// Poll interval in seconds
        #[arg(short, long, default_value = "15")]
        interval: u64,

        /// Fetch timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Viewer region as south,west,north,east (repeatable)
        #[arg(long, value_parser = parse_bounds)]
        viewer: Vec<GeographicBounds>,
    },

    /// Normalize a saved snapshot file (for testing)
    Normalize {
        /// Path to a JSON snapshot
        file: PathBuf,

        /// Number of records to print
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn parse_bounds(s: &str) -> Result<GeographicBounds, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<Result<Vec<_>, _>>()?;

    let &[south, west, north, east] = parts.as_slice() else {
        return Err(format!("expected 4 values, got {}", parts.len()));
    };

    if south > north || west > east {
        return Err("expected south <= north and west <= east".to_string());
    }

    Ok(GeographicBounds::new(south, west, north, east))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Watch {
            client_id,
            client_secret,
            api_url,
            interval,
            timeout,
            viewer,
        } => {
            let tokens: Arc<dyn TokenProvider> = match (client_id, client_secret) {
                (Some(id), Some(secret)) => {
                    tracing::info!("Using OAuth client {}", id);
                    Arc::new(OAuthTokenProvider::new(OAuthConfig::new(id, secret))?)
                }
                _ => {
                    tracing::info!("No credentials given, using anonymous access");
                    Arc::new(StaticToken::default())
                }
            };

            let client_config = ClientConfig::default()
                .with_base_url(api_url)
                .with_timeout(Duration::from_secs(timeout));
            let broadcast_config = BroadcastConfig::default()
                .with_poll_interval(Duration::from_secs(interval))
                .with_fetch_timeout(Duration::from_secs(timeout));

            run_watch(tokens, client_config, broadcast_config, viewer).await?;
        }

        Commands::Normalize { file, limit } => {
            normalize_file(&file, limit)?;
        }
    }

    Ok(())
}

async fn run_watch(
    tokens: Arc<dyn TokenProvider>,
    client_config: ClientConfig,
    broadcast_config: BroadcastConfig,
    regions: Vec<GeographicBounds>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting broadcast service");
    tracing::info!("Feed: {}", client_config.base_url);
    tracing::info!("Poll interval: {:?}", broadcast_config.poll_interval);

    let feed = Arc::new(OpenSkyClient::new(client_config)?);
    let broadcast = BroadcastService::spawn(broadcast_config, tokens, feed);

    let mut viewers: Vec<ViewerHandle> = Vec::new();
    if regions.is_empty() {
        viewers.push(Viewer::spawn(&broadcast, ViewerConfig::default()));
    }
    for region in regions {
        tracing::info!(
            "Viewer region: S={}, W={}, N={}, E={}",
            region.south,
            region.west,
            region.north,
            region.east
        );
        let mut handle = Viewer::spawn(&broadcast, ViewerConfig::default());
        handle.set_viewport(region);
        viewers.push(handle);
    }

    let mut report = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = report.tick() => {
                let s = broadcast.stats();
                tracing::info!(
                    "Stats: subscribers={}, polling={}, cached={}, fetches={}, errors={}",
                    s.subscribers,
                    s.polling,
                    s.cached_flights,
                    s.fetches,
                    s.errors
                );
                for viewer in &viewers {
                    report_viewer(viewer);
                }
            }
        }
    }

    drop(viewers);
    broadcast.shutdown();

    let final_stats = broadcast.stats();
    tracing::info!("Final statistics:");
    tracing::info!("  Total fetches: {}", final_stats.fetches);
    tracing::info!("  Total errors: {}", final_stats.errors);
    tracing::info!("  Last snapshot size: {}", final_stats.cached_flights);

    Ok(())
}

fn report_viewer(viewer: &ViewerHandle) {
    let snapshot = viewer.snapshot();
    let visible = viewer.visible(MAX_VISIBLE);

    match &snapshot.error {
        Some(error) => tracing::warn!(
            "{}: tracking {}, server reported {}: {}",
            viewer.id(),
            snapshot.flights.len(),
            error.kind,
            error.message
        ),
        None => tracing::info!(
            "{}: tracking {}, declared {}, visible {}, batches {}",
            viewer.id(),
            snapshot.flights.len(),
            snapshot.total_flights,
            visible.len(),
            snapshot.applied_batches
        ),
    }

    if let Some(top) = visible.first() {
        tracing::debug!(
            "{}: top {} {} at {:.0}",
            viewer.id(),
            top.icao24,
            top.callsign,
            top.altitude()
        );
    }
}

fn normalize_file(path: &PathBuf, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;

    tracing::info!("Normalizing file: {} ({} bytes)", path.display(), data.len());

    let raw: serde_json::Value = serde_json::from_slice(&data)?;
    let records = protocol::normalize(&raw);

    println!("Normalized {} aircraft records", records.len());
    println!();

    for (i, record) in records.iter().take(limit).enumerate() {
        println!("Record {}:", i + 1);
        println!("  ICAO: {}", record.icao24);
        println!("  Callsign: {}", record.callsign);
        println!("  Country: {}", record.origin_country);

        if let Some(p) = record.position {
            println!("  Position: {:.6}, {:.6}", p.latitude, p.longitude);
            println!("  Altitude: {:.1}", p.altitude);
        }

        println!(
            "  Velocity: {:.1} @ {:.1}°, vr {:.1}",
            record.velocity.speed, record.velocity.heading, record.velocity.vertical_rate
        );
        println!("  Category: {}", record.category);
        println!();
    }

    if records.len() > limit {
        println!("... and {} more records", records.len() - limit);
    }

    Ok(())
}
