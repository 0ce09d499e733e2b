//! Standalone mode — every subsystem in one process, wired over the
//! in-process bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use fleet_core::FleetConfig;
use fleetgrid_api::FleetService;
use fleetgrid_bus::{BestEffortFanout, InMemoryBus, Transport};
use fleetgrid_state::StateStore;

use crate::workers;

pub const DB_FILE: &str = "fleetgrid.redb";

pub async fn run_standalone(config: FleetConfig, metrics_interval: u64) -> anyhow::Result<()> {
    info!("FleetGrid daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join(DB_FILE);

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let transport: Arc<dyn Transport> = Arc::new(InMemoryBus::new());
    let fanout = Arc::new(BestEffortFanout::new(
        transport.clone(),
        config.dispatch.publish_timeout()?,
    ));

    let service = Arc::new(FleetService::new(store, transport.clone(), fanout, &config)?);
    info!("planner, arbiter and outbox initialized");

    let presence = Arc::new(service.presence_monitor(
        config.presence.offline_after()?,
        config.presence.sweep_interval()?,
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let worker_handles = workers::spawn_workers(service.clone(), transport.as_ref(), shutdown_rx.clone())?;

    let presence_handle = tokio::spawn(presence.run(shutdown_rx.clone()));

    let redelivery_handle = tokio::spawn(
        service
            .clone()
            .run_redelivery(config.dispatch.sweep_interval()?, shutdown_rx.clone()),
    );

    let metrics_service = service.clone();
    let metrics_shutdown = shutdown_rx.clone();
    let metrics_handle = tokio::spawn(async move {
        metrics_service
            .metrics()
            .run(Duration::from_secs(metrics_interval), metrics_shutdown)
            .await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = fleetgrid_api::build_router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = presence_handle.await;
    let _ = redelivery_handle.await;
    let _ = metrics_handle.await;

    info!("FleetGrid daemon stopped");
    Ok(())
}
