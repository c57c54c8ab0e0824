//! Error types for the Executor

use aro_contracts::ErrorCode;
use thiserror::Error;

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors raised by the Executor boundary
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Bearer token missing or mismatched
    #[error("Unauthorized")]
    Unauthorized,

    /// `X-Tenant-Id` header missing
    #[error("X-Tenant-Id header is required")]
    TenantHeaderRequired,

    /// Header tenant differs from the command tenant
    #[error("Tenant header does not match command tenant")]
    TenantMismatch,

    /// Tenant is not on the allow-list
    #[error("Tenant {0} is not allowed")]
    TenantNotAllowed(String),

    /// Per-tenant token bucket exhausted
    #[error("Tenant rate limit exceeded (retry after {retry_after_secs}s)")]
    TenantRateLimit { retry_after_secs: u64 },

    /// Command carries a different permission-manifest version
    #[error("Permission manifest version mismatch")]
    ManifestVersionMismatch,

    /// Command type is not on the allow-list
    #[error("Command {0} is not allowed")]
    CommandNotAllowed(String),

    /// Malformed command envelope
    #[error("Validation error: {0}")]
    Validation(String),

    /// Runtime invocation failed; becomes an `executor.command.failed` event
    #[error("Runtime failure: {0}")]
    Runtime(String),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(#[from] aro_state::StateError),

    /// Bad or missing configuration, fail-fast at startup
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExecutorError {
    /// Stable error code for the HTTP envelope
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutorError::Unauthorized => ErrorCode::Unauthorized,
            ExecutorError::TenantHeaderRequired => ErrorCode::TenantHeaderRequired,
            ExecutorError::TenantMismatch => ErrorCode::TenantMismatch,
            ExecutorError::TenantNotAllowed(_) => ErrorCode::TenantNotAllowed,
            ExecutorError::TenantRateLimit { .. } => ErrorCode::TenantRateLimitExceeded,
            ExecutorError::ManifestVersionMismatch => {
                ErrorCode::PermissionManifestVersionMismatch
            }
            ExecutorError::CommandNotAllowed(_) => ErrorCode::CommandNotAllowed,
            ExecutorError::Validation(_) => ErrorCode::ValidationError,
            ExecutorError::Runtime(_) | ExecutorError::Storage(_) | ExecutorError::Config(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Retry-after hint in seconds, when the error carries one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ExecutorError::TenantRateLimit { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
