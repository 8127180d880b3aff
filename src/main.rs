use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use innkeep::api::{self, AppState};
use innkeep::config::Config;
use innkeep::engine::Engine;
use innkeep::intake::BookingIntake;
use innkeep::queue::BookingQueue;
use innkeep::resolver::Resolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    innkeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);

    let resolver = Arc::new(Resolver::new(engine.clone()));
    let (queue, dispatcher) = BookingQueue::start(config.queue(), resolver);
    let intake = BookingIntake::new(engine.clone(), queue.clone());

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        innkeep::compactor::run_compactor(compactor_engine, threshold).await;
    });

    intake.recover_pending().await?;

    let app = api::router(AppState {
        engine: engine.clone(),
        intake,
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("innkeep listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  workers: {}, on_conflict: {}", config.workers, config.on_conflict.as_str());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("draining booking queue...");
    if queue.drain(config.shutdown_grace).await {
        info!("booking queue drained");
    } else {
        let stats = queue.stats();
        warn!("drain timeout, {} jobs still executing", stats.in_flight);
    }
    drop(queue);
    dispatcher.abort();

    info!("innkeep stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, stopping HTTP server");
}
