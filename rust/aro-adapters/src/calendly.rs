//! Calendly booking adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::signature::{derive_idempotency_key, WebhookVerifier};

/// Booking shape Core consumes; normalization is lossless for these fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBooking {
    pub external_id: String,
    pub customer_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub appointment_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Dedupe key for this delivery
    pub idempotency_key: String,
}

/// Adapter for Calendly-style booking webhooks
pub struct CalendlyAdapter {
    verifier: WebhookVerifier,
}

impl CalendlyAdapter {
    pub const SOURCE: &'static str = "calendly";

    pub fn new(webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            verifier: WebhookVerifier::new(webhook_secret, "Calendly-Webhook-Signature"),
        }
    }

    /// Verify the delivery and normalize it for ingestion
    pub fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AdapterResult<NormalizedBooking> {
        self.verifier.verify(raw_body, signature)?;
        self.normalize(raw_body)
    }

    /// Normalize a verified payload. Accepts both the flat webhook shape
    /// and Calendly's nested `payload.event` shape.
    pub fn normalize(&self, raw_body: &[u8]) -> AdapterResult<NormalizedBooking> {
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| AdapterError::MalformedPayload(format!("invalid JSON: {}", e)))?;
        let body = value.get("payload").and_then(|p| p.get("event")).unwrap_or(&value);

        let external_id = str_field(body, &["externalId", "uri", "uuid"])
            .ok_or_else(|| AdapterError::MalformedPayload("missing externalId".to_string()))?;
        let customer_phone = str_field(body, &["customerPhone", "inviteePhone"])
            .ok_or_else(|| AdapterError::MalformedPayload("missing customerPhone".to_string()))?;
        let date_str = str_field(body, &["appointmentDate", "startTime", "start_time"])
            .ok_or_else(|| AdapterError::MalformedPayload("missing appointmentDate".to_string()))?;
        let appointment_date = DateTime::parse_from_rfc3339(&date_str)
            .map_err(|e| AdapterError::MalformedPayload(format!("bad appointmentDate: {}", e)))?
            .with_timezone(&Utc);
        let service_type = str_field(body, &["serviceType", "eventType", "event_type"])
            .unwrap_or_else(|| "General".to_string());

        let canonical = serde_json::to_string(body).unwrap_or_default();
        let idempotency_key = derive_idempotency_key(
            Self::SOURCE,
            Some(external_id.as_str()),
            &canonical,
            Utc::now(),
        );

        Ok(NormalizedBooking {
            external_id,
            customer_phone,
            customer_email: str_field(body, &["customerEmail", "inviteeEmail"]),
            customer_name: str_field(body, &["customerName", "inviteeName"]),
            appointment_date,
            timezone: str_field(body, &["timezone", "tz"]),
            service_type,
            service_cost: body.get("serviceCost").and_then(|v| v.as_f64()),
            duration_minutes: body
                .get("durationMinutes")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            idempotency_key,
        })
    }
}

fn str_field(body: &serde_json::Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| body.get(*n).and_then(|v| v.as_str()))
        .map(str::to_string)
}
