//! Secret provider abstraction
//!
//! Secrets never live in plain config structs. The env-backed provider is
//! the default; a vault-capable provider can replace it without touching
//! call sites.

use crate::error::{ExecutorError, ExecutorResult};

/// Source of shared tokens and webhook secrets
pub trait SecretProvider: Send + Sync {
    /// Fetch a secret by name; absence is an error
    fn secret(&self, name: &str) -> ExecutorResult<String>;
}

/// Reads secrets from process environment variables
#[derive(Debug, Default, Clone)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn secret(&self, name: &str) -> ExecutorResult<String> {
        std::env::var(name)
            .map_err(|_| ExecutorError::Config(format!("secret {} is not set", name)))
    }
}

/// Fixed in-memory secrets for tests
#[derive(Debug, Default, Clone)]
pub struct StaticSecretProvider {
    entries: std::collections::HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn secret(&self, name: &str) -> ExecutorResult<String> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::Config(format!("secret {} is not set", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_provider_serves_and_misses() {
        let provider = StaticSecretProvider::default().with("OPENCLAW_SHARED_TOKEN", "tok");
        assert_eq!(provider.secret("OPENCLAW_SHARED_TOKEN").unwrap(), "tok");
        assert!(provider.secret("MISSING").is_err());
    }
}
