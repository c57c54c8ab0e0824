//! Stable error codes and the HTTP error envelope

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for contract validation
pub type ContractResult<T> = Result<T, ContractError>;

/// Errors raised while validating wire types at a boundary
#[derive(Error, Debug)]
pub enum ContractError {
    /// A required field is missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable machine-readable error codes shared by every HTTP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    RateLimitExceeded,
    RouteNotFound,
    CircuitBreakerOpen,
    TenantHeaderRequired,
    TenantMismatch,
    TenantNotAllowed,
    TenantRateLimitExceeded,
    PermissionManifestVersionMismatch,
    CommandNotAllowed,
    ServiceUnavailable,
    InternalError,
    AppointmentNotFound,
}

impl ErrorCode {
    /// Canonical HTTP status for this code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError
            | ErrorCode::TenantHeaderRequired
            | ErrorCode::TenantMismatch
            | ErrorCode::PermissionManifestVersionMismatch => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::TenantNotAllowed | ErrorCode::CommandNotAllowed => 403,
            ErrorCode::RouteNotFound | ErrorCode::AppointmentNotFound => 404,
            ErrorCode::RateLimitExceeded | ErrorCode::TenantRateLimitExceeded => 429,
            ErrorCode::CircuitBreakerOpen | ErrorCode::ServiceUnavailable => 503,
            ErrorCode::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Serialize through serde so the display form matches the wire form
        let s = serde_json::to_value(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.as_str().ok_or(std::fmt::Error)?)
    }
}

/// Body of the error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Seconds the caller should wait before retrying, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Uniform error envelope returned by every HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    /// Build an envelope with just a code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
                retry_after: None,
            },
        }
    }

    /// Attach a retry-after hint (seconds)
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let v = serde_json::to_value(ErrorCode::TenantRateLimitExceeded).unwrap();
        assert_eq!(v, "TENANT_RATE_LIMIT_EXCEEDED");
        assert_eq!(
            ErrorCode::PermissionManifestVersionMismatch.to_string(),
            "PERMISSION_MANIFEST_VERSION_MISMATCH"
        );
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let env = ErrorEnvelope::new(ErrorCode::ValidationError, "bad phone");
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["error"]["code"], "VALIDATION_ERROR");
        assert!(v["error"].get("retryAfter").is_none());
        assert!(v["error"].get("details").is_none());
    }

    #[test]
    fn retry_after_round_trips() {
        let env = ErrorEnvelope::new(ErrorCode::RateLimitExceeded, "slow down").with_retry_after(60);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["error"]["retryAfter"], 60);
    }
}
