//! Error types for the Core Engine

use aro_contracts::ErrorCode;
use thiserror::Error;

/// Result type for Core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Tagged error kinds; the HTTP boundary maps these to the uniform
/// envelope, nothing else does.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed body, headers, or domain input; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or mismatched service/admin token
    #[error("Unauthorized")]
    Unauthorized,

    /// Inbound rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Appointment lookup miss
    #[error("Appointment {0} not found")]
    AppointmentNotFound(String),

    /// Unknown route
    #[error("Route not found")]
    RouteNotFound,

    /// Outbound domain circuit is open
    #[error("Circuit breaker open for {domain}")]
    CircuitOpen {
        domain: &'static str,
        retry_after_secs: u64,
    },

    /// Guardrail refused the action; terminal, surfaced to admin
    #[error("Guardrail violation: {0}")]
    Guardrail(String),

    /// Transient failure talking to the Executor; retried by the worker only
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(#[from] aro_state::StateError),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error code for the HTTP envelope
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::Unauthorized => ErrorCode::Unauthorized,
            CoreError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            CoreError::AppointmentNotFound(_) => ErrorCode::AppointmentNotFound,
            CoreError::RouteNotFound => ErrorCode::RouteNotFound,
            CoreError::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            CoreError::Guardrail(_) => ErrorCode::ValidationError,
            CoreError::ExecutorUnavailable(_) => ErrorCode::ServiceUnavailable,
            CoreError::Storage(aro_state::StateError::InvalidTransition { .. }) => {
                ErrorCode::ValidationError
            }
            CoreError::Storage(aro_state::StateError::NotFound { .. }) => {
                ErrorCode::AppointmentNotFound
            }
            CoreError::Storage(_) | CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Retry-after hint, when this kind carries one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            CoreError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            CoreError::CircuitOpen {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether the dispatch worker may retry this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::ExecutorUnavailable(_) | CoreError::CircuitOpen { .. }
        )
    }
}
