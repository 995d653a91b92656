//! Edge dispatch gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                      EDGE DISPATCH                        │
//!                    │                                                           │
//!  Client Request    │  ┌────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐  │
//!  ──────────────────┼─▶│  http  │──▶│ security │──▶│ routing │──▶│resilience │  │
//!                    │  │ server │   │ limiter  │   │  table  │   │  breaker  │  │
//!                    │  └────────┘   └──────────┘   └─────────┘   └─────┬─────┘  │
//!                    │                                                  ▼        │
//!                    │                              ┌───────────┐  ┌──────────┐  │
//!  Client Response   │                              │load_balanc│─▶│  proxy   │──┼──▶ Backend
//!  ◀─────────────────┼──────────────────────────────│ring + ewma│  │   pool   │  │
//!                    │                              └───────────┘  └──────────┘  │
//!                    │                                                           │
//!                    │  admin API ──▶ AdminService ──▶ routing table + store     │
//!                    │  routes file ──▶ watcher ──▶ reconciler ──▶ routing table │
//!                    └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use edge_dispatch::admin::{setup_admin_router, AdminService, AdminState};
use edge_dispatch::config::loader::load_config_or_default;
use edge_dispatch::config::watcher::RoutesFileWatcher;
use edge_dispatch::lifecycle::{signals, Shutdown};
use edge_dispatch::observability::{logging, metrics};
use edge_dispatch::reconcile::Reconciler;
use edge_dispatch::routing::InMemoryStore;
use edge_dispatch::security::rate_limit::run_sweeper;
use edge_dispatch::{Gateway, HttpServer};

#[derive(Parser)]
#[command(name = "edge-dispatch")]
#[command(about = "Edge dispatch gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. A missing file means defaults.
    #[arg(short, long, default_value = "edge-dispatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config_or_default(&args.config)?;

    logging::init(&config.observability);
    tracing::info!("edge-dispatch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse::<SocketAddr>() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // Core state
    let gateway = Arc::new(Gateway::new(&config));
    let store = Arc::new(InMemoryStore::new());
    let admin = AdminService::new(
        gateway.table().clone(),
        gateway.backends().clone(),
        gateway.limiters().clone(),
        store,
    );
    admin.load_from_store().await?;
    gateway.apply_static_config(&config)?;

    // Background tasks
    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    tokio::spawn(run_sweeper(
        gateway.default_limiter().cloned(),
        gateway.limiters().clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
        shutdown.subscribe(),
    ));

    let (events_tx, events_rx) = mpsc::channel(config.sync.channel_capacity);
    let reconciler = Reconciler::new(gateway.table().clone(), gateway.backends().clone());
    tokio::spawn(reconciler.run(events_rx, shutdown.subscribe()));

    if let Some(path) = &config.sync.routes_file {
        let watcher = RoutesFileWatcher::new(Path::new(path), events_tx.clone());
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(rx).await {
                tracing::error!(error = %e, "Declared-routes watcher failed");
            }
        });
    }
    drop(events_tx);

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = setup_admin_router(AdminState {
            service: admin,
            gateway: gateway.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let wait = shutdown.wait();
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(wait).await {
                tracing::error!(error = %e, "Admin API server failed");
            }
        });
    }

    // Front door
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let result = HttpServer::new(gateway.clone()).run(listener, shutdown.clone()).await;

    shutdown.trigger();
    gateway.pool().close().await;
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}
