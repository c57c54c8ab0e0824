//! Guardrails executed before any outbound effect
//!
//! Fail-close, in order: actor restrictions (no auto-cancel, no
//! auto-charge), consent, the per-customer message cap, and the PHI
//! screen on generated text. A violation is terminal: it is never
//! retried, and the audit record is written redacted.

use regex::Regex;
use std::sync::OnceLock;

use aro_contracts::ExecutorCommand;
use aro_state::{AppointmentStatus, Consent, StateStore};
use chrono::Duration;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Who is requesting an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    System,
    Admin,
    Customer,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Admin => write!(f, "admin"),
            Actor::Customer => write!(f, "customer"),
        }
    }
}

/// Messages allowed per customer per rolling 24 h, independent of API limits
pub const MESSAGE_CAP_PER_24H: usize = 3;

/// The system may never cancel an appointment on its own
pub fn check_transition_actor(to: AppointmentStatus, actor: Actor) -> CoreResult<()> {
    if actor == Actor::System && to == AppointmentStatus::Cancelled {
        return Err(CoreError::Guardrail(
            "auto-cancellation is forbidden for system actors".to_string(),
        ));
    }
    Ok(())
}

/// The system may never charge without an explicit user confirmation flag
pub fn check_outbound_command(command: &ExecutorCommand) -> CoreResult<()> {
    let is_charge = command.command_type.contains("charge")
        || command.command_type.contains("capture_payment");
    if is_charge {
        let confirmed = command
            .payload
            .get("userConfirmed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !confirmed {
            return Err(CoreError::Guardrail(
                "auto-payment without user confirmation is forbidden".to_string(),
            ));
        }
    }
    Ok(())
}

/// Consent gate: absent or opted-out consent suppresses the send
pub fn check_consent(consent: Option<&Consent>) -> CoreResult<()> {
    match consent {
        Some(consent) if consent.is_current() => Ok(()),
        Some(_) => Err(CoreError::Guardrail(
            "consent was revoked for this phone".to_string(),
        )),
        None => Err(CoreError::Guardrail(
            "no messaging consent on record for this phone".to_string(),
        )),
    }
}

/// Message cap: max 3 messages per customer per rolling 24 h
pub fn check_message_cap(store: &StateStore, customer_id: Uuid) -> CoreResult<()> {
    let sent = store.messages_in_window(customer_id, Duration::hours(24))?;
    if sent >= MESSAGE_CAP_PER_24H {
        return Err(CoreError::Guardrail(format!(
            "customer message cap reached ({} in 24h)",
            sent
        )));
    }
    Ok(())
}

fn phi_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // SSN
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"),
            // Medical record numbers
            Regex::new(r"(?i)\bMRN[:\s#]*\d{5,10}\b").expect("valid regex"),
            // Clinical vocabulary that must never reach an SMS
            Regex::new(r"(?i)\b(diagnos(is|ed)|prescri(be|bed|ption)|lab result|biopsy|pathology|ICD-10|dosage)\b")
                .expect("valid regex"),
        ]
    })
}

/// PHI screen over generated text; the violating fragment is never logged
pub fn check_phi(text: &str) -> CoreResult<()> {
    for pattern in phi_patterns() {
        if pattern.is_match(text) {
            return Err(CoreError::Guardrail(
                "outbound text matched a PHI pattern [redacted]".to_string(),
            ));
        }
    }
    Ok(())
}
