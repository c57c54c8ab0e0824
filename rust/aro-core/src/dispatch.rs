//! Executor dispatch: HTTP client and the background worker loop
//!
//! The trait is the seam: the worker and the synchronous classification
//! path both go through it, and tests swap in a stub. Only transport-level
//! failures are transient; a `failed` result event is a completed dispatch
//! whose side effect failed terminally.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use aro_contracts::{ExecutorCommand, ExecutorResultEvent};

use crate::engine::CoreEngine;
use crate::error::{CoreError, CoreResult};

/// Seam between Core and the Executor process
#[async_trait]
pub trait ExecutorDispatch: Send + Sync {
    /// Deliver one command and return the executor's result event
    async fn execute(&self, command: &ExecutorCommand) -> CoreResult<ExecutorResultEvent>;
}

/// Default outbound call deadline
const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the Executor's `/v1/executions`
pub struct HttpExecutorClient {
    client: reqwest::Client,
    base_url: String,
    shared_token: String,
}

impl HttpExecutorClient {
    pub fn new(base_url: impl Into<String>, shared_token: impl Into<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(EXECUTOR_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("executor client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shared_token: shared_token.into(),
        })
    }
}

#[async_trait]
impl ExecutorDispatch for HttpExecutorClient {
    async fn execute(&self, command: &ExecutorCommand) -> CoreResult<ExecutorResultEvent> {
        let response = self
            .client
            .post(format!("{}/v1/executions", self.base_url))
            .bearer_auth(&self.shared_token)
            .header("X-Tenant-Id", &command.tenant_id)
            .header("X-Correlation-Id", &command.correlation_id)
            .json(command)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::ExecutorUnavailable("executor call timed out".to_string())
                } else {
                    CoreError::ExecutorUnavailable(format!("executor unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<ExecutorResultEvent>()
                .await
                .map_err(|e| CoreError::Internal(format!("bad executor response: {}", e)))
        } else if status.as_u16() == 429 || status.is_server_error() {
            // Tenant bucket or executor trouble: worth another attempt later
            Err(CoreError::ExecutorUnavailable(format!(
                "executor returned {}",
                status
            )))
        } else {
            // Admission refusals are configuration problems, never retried
            let body = response.text().await.unwrap_or_default();
            Err(CoreError::Internal(format!(
                "executor refused dispatch ({}): {}",
                status, body
            )))
        }
    }
}

/// Background loop draining the durable command queue
pub struct DispatchWorker {
    engine: Arc<CoreEngine>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl DispatchWorker {
    /// Build the worker and the handle that stops it
    pub fn new(engine: Arc<CoreEngine>, interval: Duration) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                engine,
                interval,
                shutdown: rx,
            },
            tx,
        )
    }

    /// Run until shutdown; a final drain tick runs before exit so accepted
    /// work is not stranded mid-stop.
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "dispatch worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.engine.worker_tick().await {
                        warn!("worker tick failed: {}", e);
                    }
                }
                changed = self.shutdown.changed() => {
                    let stopping = changed.is_err() || *self.shutdown.borrow();
                    if stopping {
                        info!("dispatch worker draining before shutdown");
                        if let Err(e) = self.engine.worker_tick().await {
                            warn!("final drain failed: {}", e);
                        }
                        break;
                    }
                }
            }
        }
        info!("dispatch worker stopped");
    }
}
