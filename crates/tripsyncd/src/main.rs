//! tripsync daemon (tripsyncd)
//!
//! The collaboration hub process: one WebSocket endpoint, one session
//! registry, periodic teardown of idle sessions.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 6382)
//! tripsyncd
//!
//! # Custom port and grace period
//! tripsyncd --port 7000 --grace-secs 120
//!
//! # With configuration file (CLI flags win over file values)
//! tripsyncd --config /etc/tripsync/config.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tripsync_core::SessionRegistry;
use tripsync_store::MemoryStore;
use tripsync_transport::CollabServer;

const DEFAULT_PORT: u16 = 6382;
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_GRACE_SECS: u64 = 300;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// tripsync daemon - collaborative itinerary hub
#[derive(Parser, Debug)]
#[command(name = "tripsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket port to listen on
    #[arg(long, env = "TRIPSYNC_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, env = "TRIPSYNC_BIND")]
    bind: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "TRIPSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TRIPSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds an empty session lingers before teardown
    #[arg(long, env = "TRIPSYNC_GRACE_SECS")]
    grace_secs: Option<u64>,

    /// Expected client heartbeat period in seconds
    #[arg(long, env = "TRIPSYNC_HEARTBEAT_SECS")]
    heartbeat_secs: Option<u64>,
}

/// Optional TOML configuration file, same knobs as the CLI
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    bind: Option<String>,
    log_level: Option<String>,
    grace_secs: Option<u64>,
    heartbeat_secs: Option<u64>,
}

#[derive(Debug)]
struct Settings {
    port: u16,
    bind: String,
    log_level: String,
    grace: Duration,
    heartbeat: Duration,
}

fn resolve(args: &Args, file: &FileConfig) -> Settings {
    Settings {
        port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
        bind: args
            .bind
            .clone()
            .or_else(|| file.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string()),
        log_level: args
            .log_level
            .clone()
            .or_else(|| file.log_level.clone())
            .unwrap_or_else(|| "info".to_string()),
        grace: Duration::from_secs(
            args.grace_secs
                .or(file.grace_secs)
                .unwrap_or(DEFAULT_GRACE_SECS),
        ),
        heartbeat: Duration::from_secs(
            args.heartbeat_secs
                .or(file.heartbeat_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_SECS),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => FileConfig::default(),
    };
    let settings = resolve(&args, &file);

    let level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let registry = Arc::new(SessionRegistry::with_grace_period(settings.grace));
    let store = Arc::new(MemoryStore::new());

    info!(
        port = settings.port,
        bind = %settings.bind,
        grace_secs = settings.grace.as_secs(),
        heartbeat_secs = settings.heartbeat.as_secs(),
        "Starting tripsync daemon"
    );

    let addr: SocketAddr = format!("{}:{}", settings.bind, settings.port).parse()?;
    let server = CollabServer::new(registry.clone(), addr)
        .with_store(store)
        .with_heartbeat(settings.heartbeat);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Hub server error");
        }
    });

    // Background teardown of sessions that sat empty past the grace period
    let gc_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = gc_registry.gc();
            if removed > 0 {
                tracing::info!(removed, "Tore down idle sessions");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    server_handle.abort();

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  tripsync hub
  Real-time itinerary collaboration
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
