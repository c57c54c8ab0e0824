//! Error types for the persistence layer

use thiserror::Error;

/// Result type for persistence operations
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the durable stores
#[derive(Error, Debug)]
pub enum StateError {
    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization failure while persisting
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File-store I/O failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity lookup miss
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Uniqueness violation (phone, external id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// State transition not allowed by the appointment graph
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<sled::Error> for StateError {
    fn from(err: sled::Error) -> Self {
        StateError::Database(err.to_string())
    }
}
