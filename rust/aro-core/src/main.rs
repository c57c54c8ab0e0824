//! ARO Core entry point

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use aro_core::{CoreConfig, CoreEngine, DispatchWorker, HttpExecutorClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CoreConfig::from_env()?;
    let dispatcher = Arc::new(HttpExecutorClient::new(
        config.executor_url.clone(),
        config.openclaw_shared_token.clone(),
    )?);

    let interval = Duration::from_millis(config.dispatch_worker_interval_ms);
    let addr = format!("{}:{}", config.host, config.port);
    let engine = Arc::new(CoreEngine::new(config, dispatcher)?);

    let (worker, stop_worker) = DispatchWorker::new(engine.clone(), interval);
    let worker_handle = tokio::spawn(worker.run());

    // Daily risk recompute tick
    let risk_engine = engine.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        tick.tick().await; // skip the immediate first fire
        loop {
            tick.tick().await;
            match risk_engine.recompute_daily_risk() {
                Ok(count) => info!(customers = count, "daily risk recompute finished"),
                Err(e) => error!("daily risk recompute failed: {}", e),
            }
        }
    });

    info!(addr = %addr, "starting ARO Core");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let app = aro_core::http::router(engine.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the worker and let it drain within a bounded grace period
    let _ = stop_worker.send(true);
    if tokio::time::timeout(Duration::from_secs(10), worker_handle)
        .await
        .is_err()
    {
        error!("dispatch worker did not drain within the grace period");
    }
    info!("core stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}
