//! Deterministic customer risk scoring
//!
//! The score is a pure function of the behavioral counters; it is
//! recomputed on every appointment status change, on counter change, and
//! by the daily sweep. Same counters, same result, always.

use aro_state::{Customer, PaymentStatus, RiskCategory};

/// Result of one risk computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskProfile {
    pub score: u8,
    pub category: RiskCategory,
    pub requires_deposit: bool,
}

/// Compute the risk profile from raw counters.
///
/// score = min(noShow*20, 40)
///       + (1 - confirmationRate) * 30
///       + (rescheduleCount / totalAppointments) * 20
///       + 10 if past_due
/// clamped to [0, 100].
pub fn risk_profile(
    no_show_count: u32,
    confirmation_rate: f64,
    reschedule_count: u32,
    total_appointments: u32,
    payment_status: PaymentStatus,
    deposit_threshold: u8,
) -> RiskProfile {
    let no_show_part = ((no_show_count as f64) * 20.0).min(40.0);
    let confirmation_part = (1.0 - confirmation_rate.clamp(0.0, 1.0)) * 30.0;
    let reschedule_part = if total_appointments > 0 {
        (reschedule_count as f64 / total_appointments as f64) * 20.0
    } else {
        0.0
    };
    let payment_part = if payment_status == PaymentStatus::PastDue {
        10.0
    } else {
        0.0
    };

    let score = (no_show_part + confirmation_part + reschedule_part + payment_part)
        .clamp(0.0, 100.0)
        .round() as u8;

    let category = if score < 40 {
        RiskCategory::Low
    } else if score < 70 {
        RiskCategory::Medium
    } else {
        RiskCategory::High
    };

    RiskProfile {
        score,
        category,
        requires_deposit: score >= deposit_threshold,
    }
}

/// Recompute and write the risk fields onto a customer.
///
/// A manually blocked customer stays blocked; only the score moves.
pub fn apply_risk(customer: &mut Customer, deposit_threshold: u8) -> RiskProfile {
    let profile = risk_profile(
        customer.no_show_count,
        customer.confirmation_rate,
        customer.reschedule_count,
        customer.total_appointments,
        customer.payment_status,
        deposit_threshold,
    );
    customer.risk_score = profile.score;
    if customer.risk_category != RiskCategory::Blocked {
        customer.risk_category = profile.category;
    }
    customer.requires_deposit = profile.requires_deposit;
    profile
}
