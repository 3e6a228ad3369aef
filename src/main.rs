//! Routeguard reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ routing decision point ──▶ flag aggregator
//!                                          │                     (weighted evaluator chain)
//!                                          ▼
//!                                    backend pool (round robin per group)
//!                                          │ admit via circuit breaker
//!                                          ▼
//!     Client Response ◀── response relay ◀── upstream attempt ──▶ Backend
//!
//!     Background: probe scheduler ──▶ health trackers ──▶ events ──▶ logs + metrics
//!                 config watcher  ──▶ runtime swap
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use routeguard::config::{load_config, ConfigWatcher, ProxyConfig};
use routeguard::lifecycle::signals::spawn_signal_handler;
use routeguard::observability::{logging, metrics};
use routeguard::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "routeguard")]
#[command(about = "Health-aware reverse proxy with feature-flag routing", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "routeguard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Dropping the watcher handle stops notifications.
    let (_watcher, reloads) = match &args.config {
        Some(path) => {
            let (watcher, reloads) = ConfigWatcher::new(path);
            (Some(watcher.run()?), reloads)
        }
        None => {
            let (_, reloads) = mpsc::unbounded_channel();
            (None, reloads)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, reloads, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
