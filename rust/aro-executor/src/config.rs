//! Executor configuration, loaded once at startup and validated fail-fast

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::error::{ExecutorError, ExecutorResult};

/// How the agent runtime is reached; modes are mutually exclusive per
/// deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    ExternalCli,
    GatewayToolsInvoke,
}

impl RuntimeMode {
    pub fn parse(s: &str) -> ExecutorResult<Self> {
        match s {
            "external_cli" => Ok(RuntimeMode::ExternalCli),
            "gateway_tools_invoke" => Ok(RuntimeMode::GatewayToolsInvoke),
            other => Err(ExecutorError::Config(format!(
                "OPENCLAW_RUNTIME_MODE must be external_cli or gateway_tools_invoke, got '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::ExternalCli => "external_cli",
            RuntimeMode::GatewayToolsInvoke => "gateway_tools_invoke",
        }
    }
}

/// Gateway tool routing for one command type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMapping {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Full Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub host: String,
    pub port: u16,
    pub permission_manifest_version: String,
    pub allowed_commands: Vec<String>,
    pub allowed_tenants: Vec<String>,
    pub tenant_rate_limit_per_minute: u32,
    pub idempotency_store_file: String,
    pub outbox_file: String,
    pub runtime_mode: RuntimeMode,
    // external_cli mode
    pub agent_id: Option<String>,
    pub agent_local_mode: bool,
    pub agent_timeout_seconds: u64,
    // gateway_tools_invoke mode
    pub gateway_url: Option<String>,
    pub gateway_tool_mappings: HashMap<String, ToolMapping>,
}

fn var(name: &str) -> ExecutorResult<String> {
    env::var(name).map_err(|_| ExecutorError::Config(format!("{} is not set", name)))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ExecutorConfig {
    /// Load from the environment; anything missing or inconsistent is fatal
    pub fn from_env() -> ExecutorResult<Self> {
        let runtime_mode = RuntimeMode::parse(&var_or("OPENCLAW_RUNTIME_MODE", "external_cli"))?;

        let config = Self {
            host: var_or("HOST", "127.0.0.1"),
            port: var_or("PORT", "4310")
                .parse()
                .map_err(|_| ExecutorError::Config("PORT must be a number".to_string()))?,
            permission_manifest_version: var("OPENCLAW_PERMISSION_MANIFEST_VERSION")?,
            allowed_commands: csv(&var("OPENCLAW_ALLOWED_COMMANDS")?),
            allowed_tenants: csv(&var("OPENCLAW_ALLOWED_TENANTS")?),
            tenant_rate_limit_per_minute: var_or("OPENCLAW_TENANT_RATE_LIMIT_PER_MINUTE", "60")
                .parse()
                .map_err(|_| {
                    ExecutorError::Config(
                        "OPENCLAW_TENANT_RATE_LIMIT_PER_MINUTE must be a number".to_string(),
                    )
                })?,
            idempotency_store_file: var_or(
                "OPENCLAW_IDEMPOTENCY_STORE_FILE",
                "./openclaw-idempotency.json",
            ),
            outbox_file: var_or("OPENCLAW_OUTBOX_FILE", "./openclaw-outbox.json"),
            runtime_mode,
            agent_id: env::var("OPENCLAW_AGENT_ID").ok(),
            agent_local_mode: var_or("OPENCLAW_AGENT_LOCAL_MODE", "false") == "true",
            agent_timeout_seconds: var_or("OPENCLAW_AGENT_TIMEOUT_SECONDS", "30")
                .parse()
                .map_err(|_| {
                    ExecutorError::Config(
                        "OPENCLAW_AGENT_TIMEOUT_SECONDS must be a number".to_string(),
                    )
                })?,
            gateway_url: env::var("OPENCLAW_GATEWAY_URL").ok(),
            gateway_tool_mappings: match env::var("OPENCLAW_GATEWAY_TOOL_MAPPINGS") {
                Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                    ExecutorError::Config(format!(
                        "OPENCLAW_GATEWAY_TOOL_MAPPINGS is not valid JSON: {}",
                        e
                    ))
                })?,
                Err(_) => HashMap::new(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.allowed_tenants.is_empty() {
            return Err(ExecutorError::Config(
                "OPENCLAW_ALLOWED_TENANTS must list at least one tenant".to_string(),
            ));
        }
        if self.allowed_commands.is_empty() {
            return Err(ExecutorError::Config(
                "OPENCLAW_ALLOWED_COMMANDS must list at least one command".to_string(),
            ));
        }
        match self.runtime_mode {
            RuntimeMode::ExternalCli => {
                if self.agent_id.as_deref().unwrap_or("").is_empty() {
                    return Err(ExecutorError::Config(
                        "OPENCLAW_AGENT_ID is required in external_cli mode".to_string(),
                    ));
                }
            }
            RuntimeMode::GatewayToolsInvoke => {
                if self.gateway_url.as_deref().unwrap_or("").is_empty() {
                    return Err(ExecutorError::Config(
                        "OPENCLAW_GATEWAY_URL is required in gateway_tools_invoke mode".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
