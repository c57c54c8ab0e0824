//! Permission manifest - versioned allow-list of executor command types

use serde::{Deserialize, Serialize};

use crate::command::ExecutorCommand;
use crate::error::ErrorCode;

/// Versioned allow-list of command types the Executor may run.
///
/// The Executor loads one manifest at startup; commands carrying a
/// different version or an unlisted type are refused before any runtime
/// invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionManifest {
    pub version: String,
    pub allowed_commands: Vec<String>,
}

impl PermissionManifest {
    pub fn new(version: impl Into<String>, allowed_commands: Vec<String>) -> Self {
        Self {
            version: version.into(),
            allowed_commands,
        }
    }

    /// Admission check for a single command; returns the refusing error
    /// code, if any.
    pub fn admit(&self, command: &ExecutorCommand) -> Result<(), ErrorCode> {
        if command.permission_manifest_version != self.version {
            return Err(ErrorCode::PermissionManifestVersionMismatch);
        }
        if !self
            .allowed_commands
            .iter()
            .any(|allowed| allowed == &command.command_type)
        {
            return Err(ErrorCode::CommandNotAllowed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandEnvelope;

    fn command(command_type: &str, version: &str) -> ExecutorCommand {
        ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: command_type.to_string(),
                payload: serde_json::json!({}),
            },
            "tenant-1",
            "corr-1",
            version,
        )
    }

    #[test]
    fn admits_listed_command_on_matching_version() {
        let manifest = PermissionManifest::new(
            "2026-07",
            vec!["integration.twilio.send_sms".to_string()],
        );
        assert!(manifest
            .admit(&command("integration.twilio.send_sms", "2026-07"))
            .is_ok());
    }

    #[test]
    fn version_mismatch_is_a_dedicated_error() {
        let manifest =
            PermissionManifest::new("2026-07", vec!["integration.twilio.send_sms".to_string()]);
        assert_eq!(
            manifest.admit(&command("integration.twilio.send_sms", "2026-06")),
            Err(ErrorCode::PermissionManifestVersionMismatch)
        );
    }

    #[test]
    fn unlisted_command_is_refused() {
        let manifest =
            PermissionManifest::new("2026-07", vec!["integration.twilio.send_sms".to_string()]);
        assert_eq!(
            manifest.admit(&command("integration.stripe.charge", "2026-07")),
            Err(ErrorCode::CommandNotAllowed)
        );
    }
}
