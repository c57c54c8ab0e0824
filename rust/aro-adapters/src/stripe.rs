//! Stripe payment adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::outbound::ResilientSender;
use crate::signature::{derive_idempotency_key, WebhookVerifier};

/// Payment event shape Core consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPaymentEvent {
    pub payment_id: String,
    /// `paid`, `failed`, or `link_created`
    pub status: String,
    /// Appointment carried in the provider metadata, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    pub received_at: DateTime<Utc>,
    pub idempotency_key: String,
}

/// Result of a payment-link creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub payment_id: String,
    pub url: String,
}

/// Adapter for Stripe-style payment webhooks and link creation
pub struct StripeAdapter {
    verifier: WebhookVerifier,
    sender: ResilientSender,
}

impl StripeAdapter {
    pub const SOURCE: &'static str = "stripe";

    pub fn new(webhook_secret: impl Into<Vec<u8>>, sender: ResilientSender) -> Self {
        Self {
            verifier: WebhookVerifier::new(webhook_secret, "Stripe-Signature"),
            sender,
        }
    }

    pub fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AdapterResult<NormalizedPaymentEvent> {
        self.verifier.verify(raw_body, signature)?;
        self.normalize(raw_body)
    }

    pub fn normalize(&self, raw_body: &[u8]) -> AdapterResult<NormalizedPaymentEvent> {
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| AdapterError::MalformedPayload(format!("invalid JSON: {}", e)))?;
        let object = value
            .get("data")
            .and_then(|d| d.get("object"))
            .unwrap_or(&value);

        let payment_id = object
            .get("paymentId")
            .or_else(|| object.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::MalformedPayload("missing payment id".to_string()))?
            .to_string();
        let status = match value.get("type").and_then(|v| v.as_str()) {
            Some("checkout.session.completed") | Some("payment_intent.succeeded") => "paid",
            Some("payment_intent.payment_failed") => "failed",
            Some("payment_link.created") => "link_created",
            _ => object
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown"),
        }
        .to_string();

        let provider_event_id = value.get("id").and_then(|v| v.as_str());
        let received_at = Utc::now();
        let canonical = serde_json::to_string(&value).unwrap_or_default();

        let appointment_id = object
            .get("metadata")
            .and_then(|m| m.get("appointmentId"))
            .or_else(|| object.get("appointmentId"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(NormalizedPaymentEvent {
            payment_id,
            status,
            appointment_id,
            amount: object
                .get("amount")
                .and_then(|v| v.as_f64())
                .map(|cents| cents / 100.0),
            currency: object
                .get("currency")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            link_url: object
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            received_at,
            idempotency_key: derive_idempotency_key(
                Self::SOURCE,
                provider_event_id,
                &canonical,
                received_at,
            ),
        })
    }

    /// Create a payment link through the resilience pipeline
    pub async fn create_payment_link<F, Fut>(&self, transport: F) -> AdapterResult<PaymentLink>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AdapterResult<PaymentLink>>,
    {
        self.sender.send(transport).await
    }
}
