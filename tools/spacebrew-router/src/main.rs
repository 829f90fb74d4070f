//! Spacebrew Router Server
//!
//! A standalone Spacebrew router that accepts WebSocket connections and
//! forwards messages along admin-configured routes.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use spacebrew_router::{Router, RouterConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN: &str = "0.0.0.0:9000";

#[derive(Parser, Debug)]
#[command(name = "spacebrew-router")]
#[command(about = "Spacebrew Router Server")]
#[command(version)]
struct Cli {
    /// Listen address [default: 0.0.0.0:9000]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Server name, used in logs
    #[arg(short, long)]
    name: Option<String>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Minimum milliseconds between data frames to one connection (0 disables)
    #[arg(long)]
    send_interval_ms: Option<u64>,

    /// Bounded outbound queue per connection
    #[arg(long)]
    outbound_capacity: Option<usize>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Do not send existing clients and routes to newly registered admins
    #[arg(long)]
    no_admin_snapshot: bool,
}

/// Settings read from `--config`; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    listen: Option<SocketAddr>,
    name: Option<String>,
    send_interval_ms: Option<u64>,
    outbound_capacity: Option<usize>,
    max_connections: Option<usize>,
    max_message_size: Option<usize>,
    admin_snapshot: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Command line flags take precedence over the file, which takes precedence over defaults
fn resolve(cli: &Cli, file: FileConfig) -> Result<(SocketAddr, RouterConfig)> {
    let listen = match cli.listen.or(file.listen) {
        Some(addr) => addr,
        None => DEFAULT_LISTEN.parse()?,
    };

    let defaults = RouterConfig::default();
    let send_interval = cli
        .send_interval_ms
        .or(file.send_interval_ms)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    let config = RouterConfig {
        name: cli.name.clone().or(file.name).unwrap_or(defaults.name),
        max_connections: cli
            .max_connections
            .or(file.max_connections)
            .unwrap_or(defaults.max_connections),
        outbound_capacity: cli
            .outbound_capacity
            .or(file.outbound_capacity)
            .unwrap_or(defaults.outbound_capacity),
        max_message_size: file.max_message_size.unwrap_or(defaults.max_message_size),
        send_interval,
        admin_snapshot: !cli.no_admin_snapshot
            && file.admin_snapshot.unwrap_or(defaults.admin_snapshot),
    };
    Ok((listen, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins unless --verbose is given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let (listen, config) = resolve(&cli, file)?;

    tracing::info!("Starting {}", config.name);
    tracing::info!("Listening on: {}", listen);
    if let Some(interval) = config.send_interval {
        tracing::info!("Per-connection send interval: {:?}", interval);
    }

    let router = Router::new(config);

    tracing::info!("Router ready, accepting connections...");

    // Run until interrupted
    let addr_str = listen.to_string();
    tokio::select! {
        result = router.serve(&addr_str) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            router.stop();
        }
    }

    Ok(())
}
