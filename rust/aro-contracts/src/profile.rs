//! Profile packs - additive per-tenant policy and template bundles
//!
//! A profile pack is read-only to Core: it supplies message templates,
//! command mappings and policy knobs for one vertical, and can never
//! mutate Core schemas or envelopes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-tenant policy knobs consulted by the workflow layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePolicies {
    /// Risk score at or above which a deposit is required
    pub deposit_threshold: u8,
    /// IANA timezone applied when neither appointment nor customer carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_timezone: Option<String>,
}

impl Default for ProfilePolicies {
    fn default() -> Self {
        Self {
            deposit_threshold: 70,
            business_timezone: None,
        }
    }
}

/// Read-only per-tenant bundle of templates, mappings and policies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePack {
    pub tenant_id: String,
    pub profile: String,
    /// Template name -> message body with `{placeholders}`
    #[serde(default)]
    pub templates: HashMap<String, String>,
    /// Workflow action -> executor command type
    #[serde(default)]
    pub command_mappings: HashMap<String, String>,
    #[serde(default)]
    pub policies: ProfilePolicies,
}

impl ProfilePack {
    /// Minimal pack for a tenant with defaults only
    pub fn minimal(tenant_id: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            profile: profile.into(),
            templates: HashMap::new(),
            command_mappings: HashMap::new(),
            policies: ProfilePolicies::default(),
        }
    }

    /// Look up a template body by name
    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let pack: ProfilePack = serde_json::from_value(serde_json::json!({
            "tenantId": "tenant-health-1",
            "profile": "healthcare"
        }))
        .unwrap();
        assert_eq!(pack.policies.deposit_threshold, 70);
        assert!(pack.template("reminder_48h").is_none());
    }
}
