//! Execution orchestration: admission, idempotent run, durable emit

use std::sync::Arc;
use tracing::{info, warn};

use aro_contracts::{ExecutorCommand, ExecutorResultEvent};

use crate::admission::AdmissionControl;
use crate::error::{ExecutorError, ExecutorResult};
use crate::idempotency::IdempotencyStore;
use crate::outbox::Outbox;
use crate::runtime::OpenclawRuntime;

/// The Executor's request-handling core
pub struct ExecutorService {
    admission: AdmissionControl,
    idempotency: IdempotencyStore,
    outbox: Outbox,
    runtime: Arc<dyn OpenclawRuntime>,
}

impl ExecutorService {
    pub fn new(
        admission: AdmissionControl,
        idempotency: IdempotencyStore,
        outbox: Outbox,
        runtime: Arc<dyn OpenclawRuntime>,
    ) -> Self {
        Self {
            admission,
            idempotency,
            outbox,
            runtime,
        }
    }

    /// Handle one `POST /v1/executions`.
    ///
    /// Order is load-bearing: admission, then the idempotency short-cut,
    /// then the runtime, then outbox append, then the idempotency record,
    /// and only then the response. A stored execution id never reaches the
    /// runtime again.
    pub async fn execute(
        &self,
        bearer: Option<&str>,
        tenant_header: Option<&str>,
        command: ExecutorCommand,
    ) -> ExecutorResult<ExecutorResultEvent> {
        self.admission.admit(bearer, tenant_header, &command)?;

        if let Some(stored) = self.idempotency.get(command.execution_id) {
            info!(execution_id = %command.execution_id, "duplicate execution, serving stored result");
            return Ok(stored);
        }

        let event = match self.runtime.invoke(&command).await {
            Ok(mut payload) => {
                payload["acknowledgedCommandType"] =
                    serde_json::Value::String(command.command_type.clone());
                payload["openclawRuntimeMode"] =
                    serde_json::Value::String(self.runtime.mode().to_string());
                ExecutorResultEvent::succeeded(
                    command.execution_id,
                    &command.tenant_id,
                    &command.correlation_id,
                    payload,
                )
            }
            Err(ExecutorError::Runtime(reason)) => {
                warn!(execution_id = %command.execution_id, reason = %reason, "runtime invocation failed");
                let mut event = ExecutorResultEvent::failed(
                    command.execution_id,
                    &command.tenant_id,
                    &command.correlation_id,
                    &reason,
                );
                event.payload["acknowledgedCommandType"] =
                    serde_json::Value::String(command.command_type.clone());
                event.payload["openclawRuntimeMode"] =
                    serde_json::Value::String(self.runtime.mode().to_string());
                event
            }
            Err(other) => return Err(other),
        };

        self.outbox.append(&event)?;
        self.idempotency.put(&event)?;
        Ok(event)
    }

    /// Outbox contents, oldest first (admin/debug surface)
    pub fn outbox_entries(&self) -> Vec<ExecutorResultEvent> {
        self.outbox.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_contracts::{CommandEnvelope, ExecutorRunStatus, PermissionManifest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRuntime {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl OpenclawRuntime for CountingRuntime {
        fn mode(&self) -> &'static str {
            "external_cli"
        }

        async fn invoke(&self, _command: &ExecutorCommand) -> ExecutorResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecutorError::Runtime("agent exploded".to_string()))
            } else {
                Ok(serde_json::json!({"openclawOutput": {"ok": true}}))
            }
        }
    }

    fn service(dir: &tempfile::TempDir, runtime: Arc<CountingRuntime>) -> ExecutorService {
        ExecutorService::new(
            AdmissionControl::new(
                "shared-token",
                vec!["tenant-health-1".to_string()],
                PermissionManifest::new(
                    "2026-07",
                    vec!["integration.twilio.send_sms".to_string()],
                ),
                600,
            ),
            IdempotencyStore::open(dir.path().join("idempotency.json")).unwrap(),
            Outbox::open(dir.path().join("outbox.json")).unwrap(),
            runtime,
        )
    }

    fn command() -> ExecutorCommand {
        ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: "integration.twilio.send_sms".to_string(),
                payload: serde_json::json!({"to": "+15551234567"}),
            },
            "tenant-health-1",
            "corr-1",
            "2026-07",
        )
    }

    #[tokio::test]
    async fn success_appends_outbox_then_idempotency() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CountingRuntime {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let service = service(&dir, runtime.clone());

        let event = service
            .execute(Some("shared-token"), Some("tenant-health-1"), command())
            .await
            .unwrap();
        assert_eq!(event.status, ExecutorRunStatus::Succeeded);
        assert_eq!(event.payload["openclawRuntimeMode"], "external_cli");
        assert_eq!(
            event.payload["acknowledgedCommandType"],
            "integration.twilio.send_sms"
        );
        assert_eq!(service.outbox_entries().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_execution_id_runs_the_runtime_once() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CountingRuntime {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let service = service(&dir, runtime.clone());
        let cmd = command();

        let first = service
            .execute(Some("shared-token"), Some("tenant-health-1"), cmd.clone())
            .await
            .unwrap();
        let second = service
            .execute(Some("shared-token"), Some("tenant-health-1"), cmd)
            .await
            .unwrap();

        assert_eq!(first.event_id, second.event_id);
        assert_eq!(runtime.calls.load(Ordering::SeqCst), 1);
        // The duplicate did not append a second outbox entry
        assert_eq!(service.outbox_entries().len(), 1);
    }

    #[tokio::test]
    async fn runtime_failure_becomes_failed_event_not_http_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CountingRuntime {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let service = service(&dir, runtime);

        let event = service
            .execute(Some("shared-token"), Some("tenant-health-1"), command())
            .await
            .unwrap();
        assert_eq!(event.status, ExecutorRunStatus::Failed);
        assert_eq!(event.payload["reason"], "agent exploded");
    }

    #[tokio::test]
    async fn refused_admission_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(CountingRuntime {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let service = service(&dir, runtime.clone());

        let mut cmd = command();
        cmd.tenant_id = "tenant-unknown".to_string();
        let err = service
            .execute(Some("shared-token"), Some("tenant-unknown"), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::TenantNotAllowed(_)));
        assert_eq!(runtime.calls.load(Ordering::SeqCst), 0);
        assert!(service.outbox_entries().is_empty());
    }
}
