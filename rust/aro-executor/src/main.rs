//! ARO Executor entry point

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use aro_contracts::PermissionManifest;
use aro_executor::{
    AdmissionControl, CliRuntime, ExecutorConfig, ExecutorService, GatewayRuntime,
    IdempotencyStore, OpenclawRuntime, Outbox, RuntimeMode,
};
use aro_executor::{EnvSecretProvider, SecretProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ExecutorConfig::from_env()?;
    let secrets = EnvSecretProvider;
    let shared_token = secrets.secret("OPENCLAW_SHARED_TOKEN")?;

    let runtime: Arc<dyn OpenclawRuntime> = match config.runtime_mode {
        RuntimeMode::ExternalCli => Arc::new(CliRuntime::new(
            config.agent_id.clone().expect("validated"),
            config.agent_local_mode,
            config.agent_timeout_seconds,
        )),
        RuntimeMode::GatewayToolsInvoke => {
            let gateway_token = secrets.secret("OPENCLAW_GATEWAY_TOKEN")?;
            Arc::new(GatewayRuntime::new(
                config.gateway_url.clone().expect("validated"),
                gateway_token,
                config.gateway_tool_mappings.clone(),
                Duration::from_secs(config.agent_timeout_seconds),
            )?)
        }
    };

    let service = Arc::new(ExecutorService::new(
        AdmissionControl::new(
            shared_token,
            config.allowed_tenants.clone(),
            PermissionManifest::new(
                config.permission_manifest_version.clone(),
                config.allowed_commands.clone(),
            ),
            config.tenant_rate_limit_per_minute,
        ),
        IdempotencyStore::open(&config.idempotency_store_file)?,
        Outbox::open(&config.outbox_file)?,
        runtime,
    ));

    let addr = format!("{}:{}", config.host, config.port);
    info!(addr = %addr, mode = config.runtime_mode.as_str(), "starting ARO Executor");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let app = aro_executor::router(service);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {}", e);
        return Err(e.into());
    }
    info!("executor stopped");
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
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
