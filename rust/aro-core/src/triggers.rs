//! Workflow trigger system
//!
//! Three trigger kinds: event (match on canonical event type), time
//! (offset from an appointment field, evaluated in the effective
//! timezone), and pattern (derived conditions over customer counters).
//! Time triggers are recomputed whenever their reference field changes.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use aro_state::Customer;

/// Reminder offsets computed at booking time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSchedule {
    pub reminder_48h_at: DateTime<Utc>,
    pub reminder_24h_at: DateTime<Utc>,
}

impl ReminderSchedule {
    /// Schedule relative to the appointment time. Recompute on reschedule.
    pub fn for_appointment(scheduled_at: DateTime<Utc>) -> Self {
        Self {
            reminder_48h_at: scheduled_at - Duration::hours(48),
            reminder_24h_at: scheduled_at - Duration::hours(24),
        }
    }
}

/// Resolve the effective IANA timezone: appointment, then customer, then
/// business, then UTC. Unparseable names fall through to the next source.
pub fn effective_timezone(
    appointment_tz: Option<&str>,
    customer_tz: Option<&str>,
    business_tz: Option<&str>,
) -> Tz {
    [appointment_tz, customer_tz, business_tz]
        .into_iter()
        .flatten()
        .find_map(|name| name.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// A trigger definition attached to a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when a canonical event of this type arrives
    Event {
        event_type: String,
    },
    /// Fires at `offset_hours` before the appointment's scheduled time
    Time {
        offset_hours: i64,
    },
    /// Fires when a derived customer condition holds
    Pattern {
        condition: PatternCondition,
    },
}

/// Derived conditions over customer counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum PatternCondition {
    NoShowCountAtLeast { value: u32 },
    RiskScoreAtLeast { value: u8 },
}

impl Trigger {
    /// Evaluate an event trigger against an incoming event type
    pub fn matches_event(&self, event_type: &str) -> bool {
        matches!(self, Trigger::Event { event_type: t } if t == event_type)
    }

    /// Evaluate a time trigger: the instant it should fire, given the
    /// current reference field value.
    pub fn fire_at(&self, scheduled_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Time { offset_hours } => Some(scheduled_at - Duration::hours(*offset_hours)),
            _ => None,
        }
    }

    /// Evaluate a pattern trigger against a customer
    pub fn matches_pattern(&self, customer: &Customer) -> bool {
        match self {
            Trigger::Pattern { condition } => match condition {
                PatternCondition::NoShowCountAtLeast { value } => {
                    customer.no_show_count >= *value
                }
                PatternCondition::RiskScoreAtLeast { value } => customer.risk_score >= *value,
            },
            _ => false,
        }
    }
}
