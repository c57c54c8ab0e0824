//! Error types for integration adapters

use thiserror::Error;

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised by provider adapters
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Webhook signature missing or mismatched
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Provider payload missing fields Core consumes
    #[error("Malformed provider payload: {0}")]
    MalformedPayload(String),

    /// Outbound call rejected by the rate limiter or breaker
    #[error("Provider unavailable (retry after {retry_after_secs}s)")]
    Unavailable { retry_after_secs: u64 },

    /// Transient provider failure, retryable by the wrapper only
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Terminal provider failure, never retried
    #[error("Terminal provider error: {0}")]
    Terminal(String),
}

impl AdapterError {
    /// Whether the retry wrapper may attempt this error again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}
