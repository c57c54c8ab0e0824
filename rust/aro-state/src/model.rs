//! Domain entities persisted by the Core Engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use aro_contracts::ExecutorCommand;

/// Display through the serde wire name so logs match the API
macro_rules! fmt_via_serde {
    () => {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let v = serde_json::to_value(self).map_err(|_| std::fmt::Error)?;
            write!(f, "{}", v.as_str().ok_or(std::fmt::Error)?)
        }
    };
}

/// Customer payment standing used by the risk formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Current,
    PastDue,
    NoHistory,
}

/// Risk band derived from the deterministic risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Blocked,
}

/// A customer, identified by a unique E.164 phone number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub no_show_count: u32,
    pub reschedule_count: u32,
    pub cancel_count: u32,
    pub total_appointments: u32,
    /// Fraction of appointments confirmed, in [0, 1]
    pub confirmation_rate: f64,
    pub lifetime_value: f64,
    pub payment_status: PaymentStatus,
    pub risk_score: u8,
    pub risk_category: RiskCategory,
    pub requires_deposit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Create a customer lazily on first booking
    pub fn new(tenant_id: impl Into<String>, phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            phone: phone.into(),
            email: None,
            name: None,
            timezone: None,
            no_show_count: 0,
            reschedule_count: 0,
            cancel_count: 0,
            total_appointments: 0,
            confirmation_rate: 1.0,
            lifetime_value: 0.0,
            payment_status: PaymentStatus::NoHistory,
            risk_score: 0,
            risk_category: RiskCategory::Low,
            requires_deposit: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Appointment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Confirmed,
    Rescheduled,
    Cancelled,
    NoShow,
    InProgress,
    Completed,
    PendingConfirm,
}

impl AppointmentStatus {
    /// Targets reachable from this state
    pub fn allowed_targets(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Booked => &[Confirmed, Rescheduled, Cancelled, NoShow, InProgress, PendingConfirm],
            Confirmed => &[Rescheduled, Cancelled, InProgress, NoShow],
            Rescheduled => &[Booked],
            InProgress => &[Completed, NoShow],
            PendingConfirm => &[Confirmed, Cancelled, NoShow],
            Completed | NoShow | Cancelled => &[],
        }
    }

    /// Whether a transition to `to` is on the allowed graph
    pub fn can_transition(&self, to: AppointmentStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }
}

impl std::fmt::Display for AppointmentStatus {
    fmt_via_serde!();
}

/// Classified intent of an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    Confirm,
    Reschedule,
    Cancel,
    Unknown,
}

impl std::fmt::Display for ReplyIntent {
    fmt_via_serde!();
}

/// A status the appointment previously held
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: AppointmentStatus,
    pub at: DateTime<Utc>,
}

/// An appointment owned by one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub tenant_id: String,
    pub customer_id: Uuid,
    /// Provider-side id, unique per provider when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    /// Resolved IANA timezone for the appointment
    pub timezone: String,
    pub duration_minutes: u32,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_cost: Option<f64>,
    pub status: AppointmentStatus,
    pub status_history: Vec<StatusChange>,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_intent: Option<ReplyIntent>,
    pub deposit_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_amount: Option<f64>,
    pub deposit_paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Appointment duration bounds in minutes
pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;

impl Appointment {
    /// Move to `to` if the graph allows it, recording history.
    ///
    /// Timestamps stay monotonic: `updated_at` only moves forward.
    pub fn transition(&mut self, to: AppointmentStatus) -> StateResult<()> {
        if !self.status.can_transition(to) {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        self.status_history.push(StatusChange {
            status: self.status,
            at: now,
        });
        self.status = to;
        if now > self.updated_at {
            self.updated_at = now;
        }
        Ok(())
    }

    /// Mark confirmed with the classified intent
    pub fn confirm(&mut self, intent: ReplyIntent) -> StateResult<()> {
        self.transition(AppointmentStatus::Confirmed)?;
        self.confirmed = true;
        self.confirmed_at = Some(Utc::now());
        self.confirmation_intent = Some(intent);
        Ok(())
    }
}

/// Reminder kinds relative to the appointment time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    #[serde(rename = "48h")]
    Hours48,
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "6h")]
    Hours6,
    Custom,
}

/// Append-only record of one reminder send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderLog {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub customer_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub kind: ReminderKind,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub delivered: bool,
    pub read: bool,
}

/// Messaging consent for one phone number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub phone: String,
    pub customer_id: Uuid,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opted_out_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Consent {
    /// Consent is current iff granted and not opted out
    pub fn is_current(&self) -> bool {
        self.granted && self.opted_out_at.is_none()
    }
}

/// Workflow runtime states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Running,
    Waiting,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }
}

/// One orchestration instance, usually per appointment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub tenant_id: String,
    pub workflow_name: String,
    pub workflow_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<Uuid>,
    pub state: WorkflowState,
    pub data: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        tenant_id: impl Into<String>,
        workflow_name: impl Into<String>,
        workflow_version: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            workflow_name: workflow_name.into(),
            workflow_version,
            appointment_id: None,
            state: WorkflowState::Pending,
            data: serde_json::Value::Null,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A command that exhausted its dispatch retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub command: ExecutorCommand,
    pub error: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub archived: bool,
}

impl DeadLetter {
    pub fn new(command: ExecutorCommand, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            error: error.into(),
            attempts,
            created_at: Utc::now(),
            archived: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            tenant_id: "tenant-1".to_string(),
            customer_id: Uuid::new_v4(),
            external_id: Some("cal_evt_1".to_string()),
            scheduled_at: Utc::now() + chrono::Duration::hours(72),
            timezone: "UTC".to_string(),
            duration_minutes: 30,
            service_type: "Consultation".to_string(),
            service_cost: None,
            status,
            status_history: Vec::new(),
            confirmed: false,
            confirmed_at: None,
            confirmation_intent: None,
            deposit_required: false,
            deposit_amount: None,
            deposit_paid: false,
            deposit_payment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_states_have_no_targets() {
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::NoShow.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(!AppointmentStatus::Booked.is_terminal());
    }

    #[test]
    fn booked_reaches_pending_confirm() {
        let mut appt = appointment(AppointmentStatus::Booked);
        appt.transition(AppointmentStatus::PendingConfirm).unwrap();
        assert_eq!(appt.status, AppointmentStatus::PendingConfirm);
        assert_eq!(appt.status_history.len(), 1);
        assert_eq!(appt.status_history[0].status, AppointmentStatus::Booked);
    }

    #[test]
    fn invalid_transition_leaves_state_untouched() {
        let mut appt = appointment(AppointmentStatus::Completed);
        let err = appt.transition(AppointmentStatus::Booked).unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert_eq!(appt.status, AppointmentStatus::Completed);
        assert!(appt.status_history.is_empty());
    }

    #[test]
    fn rescheduled_only_returns_to_booked() {
        assert_eq!(
            AppointmentStatus::Rescheduled.allowed_targets(),
            &[AppointmentStatus::Booked]
        );
    }

    #[test]
    fn confirm_records_intent_and_time() {
        let mut appt = appointment(AppointmentStatus::PendingConfirm);
        appt.confirm(ReplyIntent::Confirm).unwrap();
        assert!(appt.confirmed);
        assert!(appt.confirmed_at.is_some());
        assert_eq!(appt.confirmation_intent, Some(ReplyIntent::Confirm));
    }

    #[test]
    fn reminder_kind_serializes_as_duration_labels() {
        assert_eq!(
            serde_json::to_value(ReminderKind::Hours48).unwrap(),
            "48h"
        );
        assert_eq!(serde_json::to_value(ReminderKind::Custom).unwrap(), "custom");
    }

    #[test]
    fn consent_is_current_only_when_granted_and_not_opted_out() {
        let mut consent = Consent {
            phone: "+15551234567".to_string(),
            customer_id: Uuid::new_v4(),
            granted: true,
            granted_at: Some(Utc::now()),
            method: Some("webform".to_string()),
            opted_out_at: None,
            ip: None,
        };
        assert!(consent.is_current());
        consent.opted_out_at = Some(Utc::now());
        assert!(!consent.is_current());
    }
}
