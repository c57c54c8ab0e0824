//! Canonical event envelope and executor result events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, monotonically orderable token for resuming event reads.
///
/// Consumers must treat the inner value as opaque; only ordering matters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReplayCursor(pub u64);

impl std::fmt::Display for ReplayCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate root an event belongs to; events sharing an aggregate id are
/// totally ordered by their replay cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl Aggregate {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Aggregate for an appointment
    pub fn appointment(id: impl Into<String>) -> Self {
        Self::new("appointment", id)
    }

    /// Aggregate for a customer
    pub fn customer(id: impl Into<String>) -> Self {
        Self::new("customer", id)
    }

    /// Aggregate for an executor execution
    pub fn execution(id: impl Into<String>) -> Self {
        Self::new("execution", id)
    }
}

/// Correlation metadata carried on every canonical event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

/// Canonical event envelope appended to the durable event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    /// Dotted domain verb, e.g. `booking.received`
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub aggregate: Aggregate,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
    pub replay_cursor: ReplayCursor,
}

impl EventEnvelope {
    /// Build a new event; the replay cursor is assigned by the event log
    /// at append time and starts zeroed.
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        aggregate: Aggregate,
        payload: serde_json::Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            tenant_id: tenant_id.into(),
            profile: None,
            aggregate,
            payload,
            metadata: EventMetadata {
                workflow_id: None,
                correlation_id: correlation_id.into(),
                causation_id: None,
            },
            replay_cursor: ReplayCursor::default(),
        }
    }

    /// Record the event that caused this one
    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.metadata.causation_id = Some(causation_id.into());
        self
    }

    /// Attach the owning workflow instance
    pub fn for_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.metadata.workflow_id = Some(workflow_id.into());
        self
    }
}

/// Terminal status of an executor run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorRunStatus {
    Succeeded,
    Failed,
}

/// Result event emitted by the Executor for exactly one execution.
///
/// Ingested by Core into the canonical stream with the execution id as the
/// aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorResultEvent {
    pub event_id: Uuid,
    /// `executor.command.succeeded` or `executor.command.failed`
    pub event_type: String,
    pub execution_id: Uuid,
    pub tenant_id: String,
    pub correlation_id: String,
    pub emitted_at: DateTime<Utc>,
    pub status: ExecutorRunStatus,
    pub payload: serde_json::Value,
}

impl ExecutorResultEvent {
    /// Successful execution result
    pub fn succeeded(
        execution_id: Uuid,
        tenant_id: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_types::EXECUTOR_COMMAND_SUCCEEDED.to_string(),
            execution_id,
            tenant_id: tenant_id.into(),
            correlation_id: correlation_id.into(),
            emitted_at: Utc::now(),
            status: ExecutorRunStatus::Succeeded,
            payload,
        }
    }

    /// Failed execution result with a reason
    pub fn failed(
        execution_id: Uuid,
        tenant_id: impl Into<String>,
        correlation_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_types::EXECUTOR_COMMAND_FAILED.to_string(),
            execution_id,
            tenant_id: tenant_id.into(),
            correlation_id: correlation_id.into(),
            emitted_at: Utc::now(),
            status: ExecutorRunStatus::Failed,
            payload: serde_json::json!({ "reason": reason.into() }),
        }
    }

    /// Convert into a canonical envelope for the Core event stream
    pub fn into_envelope(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            occurred_at: self.emitted_at,
            tenant_id: self.tenant_id,
            profile: None,
            aggregate: Aggregate::execution(self.execution_id.to_string()),
            payload: self.payload,
            metadata: EventMetadata {
                workflow_id: None,
                correlation_id: self.correlation_id,
                causation_id: None,
            },
            replay_cursor: ReplayCursor::default(),
        }
    }
}

/// Canonical event type names
pub mod event_types {
    pub const BOOKING_RECEIVED: &str = "booking.received";
    pub const COMMAND_ACCEPTED: &str = "command.accepted";
    pub const COMMAND_DISPATCH_DLQ: &str = "command.dispatch.dlq";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const INBOUND_REPLY_RECEIVED: &str = "inbound.reply.received";
    pub const REPLY_CLASSIFIED: &str = "reply_classified";
    pub const APPOINTMENT_CONFIRMED: &str = "appointment.confirmed";
    pub const APPOINTMENT_CANCEL_REQUESTED: &str = "appointment.cancel_requested";
    pub const APPOINTMENT_COMPLETED: &str = "appointment.completed";
    pub const EXECUTOR_COMMAND_SUCCEEDED: &str = "executor.command.succeeded";
    pub const EXECUTOR_COMMAND_FAILED: &str = "executor.command.failed";
}
