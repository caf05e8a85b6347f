//! steer balancer entry point.

use std::sync::Arc;

use anyhow::Result;
use steer_balancer::{
    api, config,
    health::{HealthProber, ProbeConfig},
    proxy::{Forwarder, ForwarderConfig},
    state::AppState,
    stats::StatsRegistry,
    store::ConfigStore,
};
use steer_events::EventBus;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STEER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting steer balancer");
    info!(
        listen_addr = %config.listen_addr,
        data_file = %config.data_file.display(),
        check_interval_ms = config.check_interval.as_millis() as u64,
        rotation_interval_ms = config.rotation_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let store = Arc::new(ConfigStore::load(config.data_file.clone())?);
    let stats = Arc::new(StatsRegistry::new());
    let events = EventBus::new();

    let forwarder = Arc::new(Forwarder::new(
        Arc::clone(&stats),
        events.clone(),
        ForwarderConfig {
            rotation_interval: config.rotation_interval,
        },
    ));

    let prober = Arc::new(HealthProber::new(
        Arc::clone(&store),
        ProbeConfig {
            interval: config.check_interval,
            timeout: config.probe_timeout,
            concurrency: config.probe_concurrency,
        },
    )?);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the health/reconcile loop in the background
    let prober_handle = tokio::spawn({
        let prober = Arc::clone(&prober);
        let forwarder = Arc::clone(&forwarder);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            prober.run(forwarder, shutdown_rx).await;
        }
    });

    // Build and run the control plane
    let state = AppState::new(store, stats, forwarder, prober, events);
    let app = api::create_router(state, config.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Control API listening");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("Control API shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    if let Err(e) = prober_handle.await {
        error!(error = %e, "Health prober task failed");
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Control API server failed"),
        Err(e) => error!(error = %e, "Control API task failed"),
    }

    info!("Shutdown complete");
    Ok(())
}
