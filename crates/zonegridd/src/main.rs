//! zonegridd: the ZoneGrid daemon.
//!
//! Single binary that assembles the ZoneGrid subsystems:
//! - State store (redb)
//! - Fleet client (HTTP, or in-memory for local development)
//! - Zone orchestrator + notification bus
//! - Reconciliation loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! zonegridd run --config /etc/zonegrid/zonegrid.toml --port 3000 --data-dir /var/lib/zonegrid
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use zonegrid_fleet::{FleetClient, HttpFleetClient, InMemoryFleet};
use zonegrid_orchestrator::{BroadcastBus, ZoneOrchestrator};
use zonegrid_reconcile::Reconciler;
use zonegrid_state::StateStore;

use crate::config::{DaemonConfig, FleetMode};

const DEFAULT_LOG_FILTER: &str = "info,zonegridd=debug,zonegrid=debug";
const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "zonegridd", about = "ZoneGrid zone orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator, reconciliation loop and API server.
    Run {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            log_json,
        } => {
            init_tracing(log_json);

            let mut config = DaemonConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run(config).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("ZoneGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("zonegrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let fleet: Arc<dyn FleetClient> = match config.fleet.mode {
        FleetMode::Http => {
            if config.fleet.secret.is_empty() {
                warn!("fleet secret is empty, requests will likely be rejected");
            }
            Arc::new(HttpFleetClient::new(&config.fleet.client_config())?)
        }
        FleetMode::Memory => {
            warn!("using in-memory fleet, no game servers will actually run");
            Arc::new(InMemoryFleet::new())
        }
    };
    info!(mode = ?config.fleet.mode, base_url = %config.fleet.base_url, "fleet client initialized");

    let bus = Arc::new(BroadcastBus::new(EVENT_BUS_CAPACITY));
    let events = bus.subscribe();

    let orchestrator = Arc::new(
        ZoneOrchestrator::new(
            store.clone(),
            Arc::new(store.clone()),
            fleet.clone(),
            config.launch.clone(),
        )
        .with_bus(bus.clone()),
    );
    info!(gd_server_version = %config.launch.gd_server_version, "zone orchestrator initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let events_handle = tokio::spawn(log_events(events, shutdown_rx.clone()));

    let reconcile_handle = if config.reconcile.enabled {
        let reconciler = Reconciler::new(store.clone(), fleet, config.reconcile.stale_after_secs)
            .with_bus(bus);
        let interval = Duration::from_secs(config.reconcile.interval_secs.max(1));
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            reconciler.run(interval, shutdown).await;
        }))
    } else {
        warn!("reconciliation disabled, fleet drift will not be healed");
        None
    };

    // ── Start API server ───────────────────────────────────────

    if config.server.admin_secret.is_empty() {
        warn!("admin secret is empty, admin routes are disabled");
    }
    let router = zonegrid_api::build_router(zonegrid_api::ApiState {
        orchestrator,
        store,
        admin_secret: config.server.admin_secret.clone(),
        idle_threshold_secs: config.idle.threshold_secs,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    if let Some(handle) = reconcile_handle {
        let _ = handle.await;
    }
    let _ = events_handle.await;

    info!("ZoneGrid daemon stopped");
    Ok(())
}

/// Log zone change events until shutdown.
async fn log_events(
    mut events: broadcast::Receiver<zonegrid_orchestrator::ZoneEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "zone event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "zone event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
