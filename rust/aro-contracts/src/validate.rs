//! Boundary validation helpers

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ContractError, ContractResult};

/// Strict E.164: `+` then 2-15 digits, no leading zero
fn e164() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid E.164 regex"))
}

/// Validate a phone number is strict E.164
pub fn validate_phone(phone: &str) -> ContractResult<()> {
    if e164().is_match(phone) {
        Ok(())
    } else {
        Err(ContractError::Validation(format!(
            "phone '{}' is not E.164",
            phone
        )))
    }
}

/// Validate a header-style identifier is present and non-blank
pub fn validate_non_empty(name: &str, value: &str) -> ContractResult<()> {
    if value.trim().is_empty() {
        Err(ContractError::Validation(format!(
            "{} must be non-empty",
            name
        )))
    } else {
        Ok(())
    }
}

/// Clamp an event-page limit to the hard maximum of 500
pub fn clamp_event_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(100).min(500)
}
