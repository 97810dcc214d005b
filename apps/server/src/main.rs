//! Ariyo Server - Standalone headless server for Ariyo.
//!
//! Serves the same-origin audio proxy that Ariyo pages route CORS-less and
//! plain-HTTP streams through. Optionally monitors one catalog station
//! through the playback engine, logging every status transition.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ariyo_core::media::stream_http_client;
use ariyo_core::{
    start_server, BroadcastStatusBridge, HttpStreamElement, LoggingStatusListener,
    PlaybackStatus, ProxyState, RadioEngine, StatusEvent,
};
use clap::Parser;
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::{broadcast, oneshot};

use crate::config::ServerConfig;

/// Capacity of the monitor's status channel.
const MONITOR_CHANNEL_CAPACITY: usize = 64;

/// Ariyo Server - audio proxy and stream monitor.
#[derive(Parser, Debug)]
#[command(name = "ariyo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ARIYO_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "ARIYO_BIND_PORT")]
    port: Option<u16>,

    /// Bind address (overrides config file).
    #[arg(short = 'b', long, env = "ARIYO_BIND_ADDRESS")]
    bind: Option<std::net::IpAddr>,

    /// Station id or name to monitor (overrides config file).
    #[arg(short = 'm', long, env = "ARIYO_MONITOR")]
    monitor: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Ariyo Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ip) = args.bind {
        config.bind_address = ip;
    }
    if let Some(monitor) = args.monitor {
        config.monitor = Some(monitor);
    }
    config.validate()?;

    log::info!(
        "Configuration: bind={}, stations={}, monitor={}",
        config.bind_addr(),
        config.stations.len(),
        config.monitor.as_deref().unwrap_or("off")
    );

    let state = ProxyState::new(config.proxy.clone()).context("Failed to set up audio proxy")?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let bind_addr = config.bind_addr();
    let server_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = start_server(bind_addr, state, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    let monitor = match config.monitor.clone() {
        Some(key) => Some(start_monitor(&config, &key).context("Failed to start stream monitor")?),
        None => None,
    };

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    if let Some(monitor) = monitor {
        monitor.shutdown().await;
    }
    let _ = stop_tx.send(());
    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Monitor
// ─────────────────────────────────────────────────────────────────────────────

/// A playback engine driving a headless element, plus its log task.
struct Monitor {
    engine: RadioEngine,
    log_task: tokio::task::JoinHandle<()>,
    last_status: Arc<Mutex<Option<PlaybackStatus>>>,
}

impl Monitor {
    async fn shutdown(self) {
        self.engine.dispose().await;
        self.log_task.abort();
        if let Some(status) = *self.last_status.lock() {
            log::info!("[Monitor] Final status: {:?}", status);
        }
    }
}

fn start_monitor(config: &ServerConfig, key: &str) -> Result<Monitor> {
    let element = HttpStreamElement::new(stream_http_client()?);
    let engine = RadioEngine::builder(Arc::new(element))
        .stations(config.stations.clone())
        .config(config.monitor_engine_config())
        .build()?;

    let bridge = BroadcastStatusBridge::new(MONITOR_CHANNEL_CAPACITY);
    let rx = bridge.subscribe();
    // Subscriptions live as long as the engine; dispose releases them.
    let _ = engine.subscribe(Arc::new(bridge));
    let _ = engine.on_status_change(LoggingStatusListener);

    let last_status = Arc::new(Mutex::new(None));
    let log_task = tokio::spawn(log_statuses(rx, Arc::clone(&last_status)));

    log::info!("[Monitor] Starting playback of {}", key);
    engine.play_station(key)?;

    Ok(Monitor {
        engine,
        log_task,
        last_status,
    })
}

async fn log_statuses(
    mut rx: broadcast::Receiver<StatusEvent>,
    last_status: Arc<Mutex<Option<PlaybackStatus>>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.status.is_lifecycle() {
                    *last_status.lock() = Some(event.status);
                }
                let station = event
                    .station
                    .as_ref()
                    .map(|s| s.label().to_string())
                    .unwrap_or_else(|| "-".to_string());
                match (event.attempt, event.retry_delay_ms, event.error.as_deref()) {
                    (Some(attempt), Some(delay), error) => log::info!(
                        "[Monitor] {:?} {} (attempt {}, in {}ms){}",
                        event.status,
                        station,
                        attempt,
                        delay,
                        error.map(|e| format!(": {e}")).unwrap_or_default()
                    ),
                    (_, _, Some(error)) => {
                        log::warn!("[Monitor] {:?} {}: {}", event.status, station, error)
                    }
                    _ => log::info!("[Monitor] {:?} {}", event.status, station),
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[Monitor] Dropped {} status events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
