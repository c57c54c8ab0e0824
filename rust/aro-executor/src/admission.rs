//! Admission control for `POST /v1/executions`
//!
//! Checks run in a fixed order; the first failure wins. Token comparison is
//! constant-time. The per-tenant token bucket refuses rather than waits:
//! the caller (Core's dispatch worker) owns retry policy.

use std::collections::HashSet;
use subtle::ConstantTimeEq;

use aro_contracts::{ErrorCode, ExecutorCommand, PermissionManifest};
use aro_resilience::{KeyedTokenBucket, TokenBucketConfig};

use crate::error::{ExecutorError, ExecutorResult};

/// Tenant-boundary enforcement in front of the runtime
pub struct AdmissionControl {
    shared_token: String,
    allowed_tenants: HashSet<String>,
    manifest: PermissionManifest,
    tenant_buckets: KeyedTokenBucket,
}

impl AdmissionControl {
    pub fn new(
        shared_token: impl Into<String>,
        allowed_tenants: impl IntoIterator<Item = String>,
        manifest: PermissionManifest,
        tenant_rate_limit_per_minute: u32,
    ) -> Self {
        Self {
            shared_token: shared_token.into(),
            allowed_tenants: allowed_tenants.into_iter().collect(),
            manifest,
            tenant_buckets: KeyedTokenBucket::new(TokenBucketConfig::per_minute(
                tenant_rate_limit_per_minute,
            )),
        }
    }

    /// Run the full admission chain for one request
    pub fn admit(
        &self,
        bearer: Option<&str>,
        tenant_header: Option<&str>,
        command: &ExecutorCommand,
    ) -> ExecutorResult<()> {
        // 1. Shared token, constant-time
        let bearer = bearer.ok_or(ExecutorError::Unauthorized)?;
        if !bool::from(bearer.as_bytes().ct_eq(self.shared_token.as_bytes())) {
            return Err(ExecutorError::Unauthorized);
        }

        // 2. Tenant header present and matching the command
        let tenant = tenant_header
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExecutorError::TenantHeaderRequired)?;
        if tenant != command.tenant_id {
            return Err(ExecutorError::TenantMismatch);
        }

        // 3. Tenant allow-list
        if !self.allowed_tenants.contains(&command.tenant_id) {
            return Err(ExecutorError::TenantNotAllowed(command.tenant_id.clone()));
        }

        // 4. Per-tenant rate limit
        if let Err(wait) = self.tenant_buckets.try_acquire(&command.tenant_id) {
            return Err(ExecutorError::TenantRateLimit {
                retry_after_secs: wait.as_secs().max(1),
            });
        }

        // 5-6. Permission manifest: version, then command allow-list
        command
            .validate()
            .map_err(|e| ExecutorError::Validation(e.to_string()))?;
        match self.manifest.admit(command) {
            Ok(()) => Ok(()),
            Err(ErrorCode::PermissionManifestVersionMismatch) => {
                Err(ExecutorError::ManifestVersionMismatch)
            }
            Err(_) => Err(ExecutorError::CommandNotAllowed(command.command_type.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_contracts::CommandEnvelope;

    fn command(tenant: &str, command_type: &str, version: &str) -> ExecutorCommand {
        ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: command_type.to_string(),
                payload: serde_json::json!({}),
            },
            tenant,
            "corr-1",
            version,
        )
    }

    fn control(rate: u32) -> AdmissionControl {
        AdmissionControl::new(
            "shared-token",
            vec!["tenant-health-1".to_string()],
            PermissionManifest::new(
                "2026-07",
                vec![
                    "integration.twilio.send_sms".to_string(),
                    "integration.nlp.classify_reply".to_string(),
                ],
            ),
            rate,
        )
    }

    #[test]
    fn happy_path_admits() {
        let control = control(60);
        let cmd = command("tenant-health-1", "integration.twilio.send_sms", "2026-07");
        control
            .admit(Some("shared-token"), Some("tenant-health-1"), &cmd)
            .unwrap();
    }

    #[test]
    fn bad_bearer_is_unauthorized() {
        let control = control(60);
        let cmd = command("tenant-health-1", "integration.twilio.send_sms", "2026-07");
        assert!(matches!(
            control.admit(Some("wrong"), Some("tenant-health-1"), &cmd),
            Err(ExecutorError::Unauthorized)
        ));
        assert!(matches!(
            control.admit(None, Some("tenant-health-1"), &cmd),
            Err(ExecutorError::Unauthorized)
        ));
    }

    #[test]
    fn header_checks_precede_allow_list() {
        let control = control(60);
        let cmd = command("tenant-unknown", "integration.twilio.send_sms", "2026-07");
        assert!(matches!(
            control.admit(Some("shared-token"), None, &cmd),
            Err(ExecutorError::TenantHeaderRequired)
        ));
        assert!(matches!(
            control.admit(Some("shared-token"), Some("tenant-health-1"), &cmd),
            Err(ExecutorError::TenantMismatch)
        ));
    }

    #[test]
    fn untrusted_tenant_is_refused() {
        let control = control(60);
        let cmd = command("tenant-unknown", "integration.twilio.send_sms", "2026-07");
        assert!(matches!(
            control.admit(Some("shared-token"), Some("tenant-unknown"), &cmd),
            Err(ExecutorError::TenantNotAllowed(_))
        ));
    }

    #[test]
    fn tenant_bucket_caps_admits_per_minute() {
        let control = control(3);
        for _ in 0..3 {
            let cmd = command("tenant-health-1", "integration.twilio.send_sms", "2026-07");
            control
                .admit(Some("shared-token"), Some("tenant-health-1"), &cmd)
                .unwrap();
        }
        let cmd = command("tenant-health-1", "integration.twilio.send_sms", "2026-07");
        assert!(matches!(
            control.admit(Some("shared-token"), Some("tenant-health-1"), &cmd),
            Err(ExecutorError::TenantRateLimit { .. })
        ));
    }

    #[test]
    fn manifest_version_then_command_allow_list() {
        let control = control(60);
        let cmd = command("tenant-health-1", "integration.twilio.send_sms", "2025-01");
        assert!(matches!(
            control.admit(Some("shared-token"), Some("tenant-health-1"), &cmd),
            Err(ExecutorError::ManifestVersionMismatch)
        ));

        let cmd = command("tenant-health-1", "integration.stripe.charge", "2026-07");
        assert!(matches!(
            control.admit(Some("shared-token"), Some("tenant-health-1"), &cmd),
            Err(ExecutorError::CommandNotAllowed(_))
        ));
    }
}
