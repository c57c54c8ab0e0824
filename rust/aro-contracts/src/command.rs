//! Command envelopes accepted by Core and dispatched to the Executor

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContractError, ContractResult};

/// Prefix routing a command to the Executor
pub const INTEGRATION_PREFIX: &str = "integration.";

/// Body of `POST /v1/commands`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Dotted command type; `integration.*` routes to the Executor
    pub command_type: String,
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Whether this command must be dispatched through the Executor
    pub fn is_integration(&self) -> bool {
        self.command_type.starts_with(INTEGRATION_PREFIX)
    }

    /// Reject empty or non-dotted command types
    pub fn validate(&self) -> ContractResult<()> {
        if self.command_type.trim().is_empty() {
            return Err(ContractError::Validation(
                "commandType must be non-empty".to_string(),
            ));
        }
        if !self.command_type.contains('.') {
            return Err(ContractError::Validation(format!(
                "commandType '{}' must be a dotted domain verb",
                self.command_type
            )));
        }
        Ok(())
    }
}

/// Required headers on command submission, validated before handling
#[derive(Debug, Clone)]
pub struct CommandHeaders {
    pub tenant_id: String,
    pub idempotency_key: String,
    pub correlation_id: String,
}

impl CommandHeaders {
    pub fn validate(&self) -> ContractResult<()> {
        for (name, value) in [
            ("X-Tenant-Id", &self.tenant_id),
            ("Idempotency-Key", &self.idempotency_key),
            ("X-Correlation-Id", &self.correlation_id),
        ] {
            if value.trim().is_empty() {
                return Err(ContractError::Validation(format!(
                    "header {} must be non-empty",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Command sent from Core to the Executor (`POST /v1/executions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorCommand {
    pub execution_id: Uuid,
    pub tenant_id: String,
    pub correlation_id: String,
    pub command_type: String,
    /// Always true for commands originating from Core; the Executor
    /// rejects anything else.
    pub authorized_by_core: bool,
    pub permission_manifest_version: String,
    pub payload: serde_json::Value,
}

impl ExecutorCommand {
    /// Authorize a command envelope for executor dispatch
    pub fn authorize(
        envelope: &CommandEnvelope,
        tenant_id: impl Into<String>,
        correlation_id: impl Into<String>,
        manifest_version: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            correlation_id: correlation_id.into(),
            command_type: envelope.command_type.clone(),
            authorized_by_core: true,
            permission_manifest_version: manifest_version.into(),
            payload: envelope.payload.clone(),
        }
    }

    pub fn validate(&self) -> ContractResult<()> {
        if !self.authorized_by_core {
            return Err(ContractError::Validation(
                "command is not authorized by Core".to_string(),
            ));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ContractError::Validation(
                "tenantId must be non-empty".to_string(),
            ));
        }
        if self.command_type.trim().is_empty() {
            return Err(ContractError::Validation(
                "commandType must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
