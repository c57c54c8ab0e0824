//! Runtime modes for reaching the openclaw agent
//!
//! Exactly one mode is active per deployment: a CLI subprocess with a hard
//! deadline, or an authenticated HTTP gateway. Both return the payload
//! fragment that goes into the result event; every failure becomes an
//! `executor.command.failed` event, never a hung call.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use aro_contracts::ExecutorCommand;

use crate::config::ToolMapping;
use crate::error::{ExecutorError, ExecutorResult};

/// Safety preamble prepended to every agent message. The runtime is
/// untrusted; this is the contract it is reminded of on each invocation.
pub const AGENT_PREAMBLE: &str = "You are invoked by the ARO Executor. Execute exactly one \
Core-authorized side effect described by the attached command; do not initiate further \
workflows and do not mutate business state.";

/// Abstraction over the agent runtime invocation
#[async_trait]
pub trait OpenclawRuntime: Send + Sync {
    /// Wire name of the mode, recorded on every result event
    fn mode(&self) -> &'static str;

    /// Run one command; the returned value is the mode-specific payload
    /// fragment including `openclawOutput`.
    async fn invoke(&self, command: &ExecutorCommand) -> ExecutorResult<serde_json::Value>;
}

/// CLI subprocess mode: `openclaw agent --agent <id> --message <json> --json --timeout <sec>`
pub struct CliRuntime {
    program: String,
    agent_id: String,
    local_mode: bool,
    timeout: Duration,
}

impl CliRuntime {
    pub fn new(agent_id: impl Into<String>, local_mode: bool, timeout_seconds: u64) -> Self {
        Self {
            program: "openclaw".to_string(),
            agent_id: agent_id.into(),
            local_mode,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Override the binary; tests point this at a stub
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Agent message: preamble plus the serialized command envelope
    fn agent_message(command: &ExecutorCommand) -> String {
        let envelope = serde_json::to_string(command).unwrap_or_default();
        format!("{}\n{}", AGENT_PREAMBLE, envelope)
    }

    /// Argument vector for one invocation
    pub fn build_args(&self, command: &ExecutorCommand) -> Vec<String> {
        let mut args = vec![
            "agent".to_string(),
            "--agent".to_string(),
            self.agent_id.clone(),
            "--message".to_string(),
            Self::agent_message(command),
            "--json".to_string(),
            "--timeout".to_string(),
            self.timeout.as_secs().to_string(),
        ];
        if self.local_mode {
            args.push("--local".to_string());
        }
        args
    }
}

#[async_trait]
impl OpenclawRuntime for CliRuntime {
    fn mode(&self) -> &'static str {
        "external_cli"
    }

    async fn invoke(&self, command: &ExecutorCommand) -> ExecutorResult<serde_json::Value> {
        let child = Command::new(&self.program)
            .args(self.build_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Runtime(format!("failed to spawn {}: {}", self.program, e)))?;

        // kill_on_drop terminates the subprocess when the deadline fires
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| ExecutorError::Runtime(format!("subprocess wait failed: {}", e)))?,
            Err(_) => {
                warn!(execution_id = %command.execution_id, "agent subprocess timed out");
                return Err(ExecutorError::Runtime(format!(
                    "agent timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExecutorError::Runtime(if stderr.is_empty() {
                format!("agent exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let openclaw_output = serde_json::from_str::<serde_json::Value>(&stdout)
            .unwrap_or_else(|_| serde_json::json!({ "text": stdout }));
        debug!(execution_id = %command.execution_id, "agent subprocess completed");

        Ok(serde_json::json!({
            "agentId": self.agent_id,
            "localMode": self.local_mode,
            "openclawOutput": openclaw_output,
        }))
    }
}

/// HTTP gateway mode: `POST <gatewayUrl>/tools/invoke`
pub struct GatewayRuntime {
    client: reqwest::Client,
    gateway_url: String,
    token: String,
    mappings: std::collections::HashMap<String, ToolMapping>,
}

impl GatewayRuntime {
    pub fn new(
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        mappings: std::collections::HashMap<String, ToolMapping>,
        timeout: Duration,
    ) -> ExecutorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Config(format!("gateway client: {}", e)))?;
        Ok(Self {
            client,
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            mappings,
        })
    }
}

#[async_trait]
impl OpenclawRuntime for GatewayRuntime {
    fn mode(&self) -> &'static str {
        "gateway_tools_invoke"
    }

    async fn invoke(&self, command: &ExecutorCommand) -> ExecutorResult<serde_json::Value> {
        let mapping = self.mappings.get(&command.command_type).ok_or_else(|| {
            ExecutorError::Runtime(format!(
                "no gateway tool mapping for {}",
                command.command_type
            ))
        })?;

        let mut body = serde_json::json!({
            "tool": mapping.tool,
            "args": {
                "executionId": command.execution_id,
                "tenantId": command.tenant_id,
                "correlationId": command.correlation_id,
                "commandType": command.command_type,
                "payload": command.payload,
            }
        });
        if let Some(action) = &mapping.action {
            body["action"] = serde_json::Value::String(action.clone());
        }

        let response = self
            .client
            .post(format!("{}/tools/invoke", self.gateway_url))
            .bearer_auth(&self.token)
            .header("X-Correlation-Id", &command.correlation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Runtime("gateway call timed out".to_string())
                } else {
                    ExecutorError::Runtime(format!("gateway call failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ExecutorError::Runtime(format!(
                "gateway returned {}: {}",
                status, text
            )));
        }

        let openclaw_output = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or_else(|_| serde_json::json!({ "text": text }));

        Ok(serde_json::json!({
            "tool": mapping.tool,
            "action": mapping.action,
            "openclawOutput": openclaw_output,
        }))
    }
}
