//! campus-sync - offline action queue and synchronization engine
//!
//! This is the sync-agent entry point: it opens the durable store, probes
//! reachability, and drains the offline action queue against the campus API
//! until shut down.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use campus_sync::config::Config;
use campus_sync::store::SqliteStore;
use campus_sync::sync::{
    FlushConfig, HttpRemoteExecutor, HttpSnapshotApi, ReachabilityConfig, ReachabilityMonitor,
    ReachabilityProbe, RetryPolicy, SnapshotRefresher, SyncOrchestrator,
};

/// campus-sync - offline action queue and synchronization engine
#[derive(Parser, Debug)]
#[command(name = "campus-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CAMPUS_SYNC_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    init_tracing(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting campus-sync agent"
    );

    // A store that cannot open must stop the agent here: falling back to an
    // empty queue would silently lose queued actions
    let store = Arc::new(SqliteStore::new(&config.database.path).await?);
    info!(path = %config.database.path, "Store opened");

    let (shutdown_tx, _) = broadcast::channel(1);

    // Reachability: debounced monitor fed by the HTTP probe
    let monitor = ReachabilityMonitor::new(
        ReachabilityConfig {
            settle_window_ms: config.reachability.settle_window_ms,
            assume_online: false,
        },
        shutdown_tx.subscribe(),
    );
    let reachability = monitor.subscribe();
    let probe_url = config
        .reachability
        .probe_url
        .clone()
        .unwrap_or_else(|| config.remote.base_url.clone());
    let probe = ReachabilityProbe::new(
        probe_url,
        Duration::from_secs(config.reachability.probe_interval_secs),
        monitor.handle(),
        shutdown_tx.subscribe(),
    );

    // Flush engine
    let executor = Arc::new(HttpRemoteExecutor::new(
        config.remote.base_url.clone(),
        Duration::from_secs(config.remote.request_timeout_secs),
    ));
    let orchestrator = SyncOrchestrator::new(
        FlushConfig {
            flush_interval_secs: config.sync.flush_interval_secs,
            jitter_secs: config.sync.jitter_secs,
            call_timeout_secs: config.sync.call_timeout_secs,
        },
        Arc::clone(&store),
        executor,
        RetryPolicy::new(config.sync.max_retries),
        reachability.clone(),
        shutdown_tx.subscribe(),
    );
    let mut status_rx = orchestrator.subscribe_status();

    // Read-side snapshot refresh
    let api = Arc::new(HttpSnapshotApi::new(
        config.remote.base_url.clone(),
        Duration::from_secs(config.remote.request_timeout_secs),
    ));
    let refresher = SnapshotRefresher::new(
        Arc::clone(&store),
        api,
        reachability,
        Duration::from_secs(config.snapshots.refresh_interval_secs),
        shutdown_tx.subscribe(),
    );

    let monitor_task = tokio::spawn(monitor.run());
    let probe_task = tokio::spawn(probe.run());
    let orchestrator_task = tokio::spawn(orchestrator.run());
    let refresher_task = tokio::spawn(refresher.run());

    // Log status transitions until a shutdown signal arrives
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                info!(
                    pending = status.pending_items,
                    failed = status.failed_items,
                    syncing = status.is_syncing,
                    "Sync status"
                );
            }
        }
    }

    let _ = shutdown_tx.send(());
    let _ = monitor_task.await;
    let _ = probe_task.await;
    let _ = orchestrator_task.await;
    let _ = refresher_task.await;

    info!("campus-sync shutdown complete");

    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Initialize tracing from the logging configuration
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
