//! Twilio messaging adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::outbound::ResilientSender;
use crate::signature::{derive_idempotency_key, WebhookVerifier};

/// Inbound SMS reply shape Core consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedInboundMessage {
    pub from_phone: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub idempotency_key: String,
}

/// Outcome of an outbound send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Adapter for Twilio-style messaging webhooks and sends
pub struct TwilioAdapter {
    verifier: WebhookVerifier,
    sender: ResilientSender,
}

impl TwilioAdapter {
    pub const SOURCE: &'static str = "twilio";

    pub fn new(webhook_secret: impl Into<Vec<u8>>, sender: ResilientSender) -> Self {
        Self {
            verifier: WebhookVerifier::new(webhook_secret, "X-Twilio-Signature"),
            sender,
        }
    }

    /// Verify an inbound-reply delivery and normalize it
    pub fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AdapterResult<NormalizedInboundMessage> {
        self.verifier.verify(raw_body, signature)?;
        self.normalize(raw_body)
    }

    pub fn normalize(&self, raw_body: &[u8]) -> AdapterResult<NormalizedInboundMessage> {
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| AdapterError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let from_phone = value
            .get("from")
            .or_else(|| value.get("From"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::MalformedPayload("missing from".to_string()))?
            .to_string();
        let text = value
            .get("text")
            .or_else(|| value.get("Body"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::MalformedPayload("missing text".to_string()))?
            .to_string();
        let provider_message_id = value
            .get("messageSid")
            .or_else(|| value.get("MessageSid"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let received_at = Utc::now();
        let canonical = serde_json::to_string(&value).unwrap_or_default();
        let idempotency_key = derive_idempotency_key(
            Self::SOURCE,
            provider_message_id.as_deref(),
            &canonical,
            received_at,
        );

        Ok(NormalizedInboundMessage {
            from_phone,
            text,
            provider_message_id,
            received_at,
            idempotency_key,
        })
    }

    /// Send one SMS through the resilience pipeline.
    ///
    /// `transport` performs the actual provider call; the adapter owns the
    /// ordering of bucket, breaker and retry around it.
    pub async fn send_sms<F, Fut>(&self, transport: F) -> AdapterResult<SendReceipt>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AdapterResult<SendReceipt>>,
    {
        self.sender.send(transport).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_resilience::{
        CircuitBreaker, CircuitBreakerConfig, ProviderDomain, RetryConfig, TokenBucket,
        TokenBucketConfig,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn adapter() -> TwilioAdapter {
        TwilioAdapter::new(
            b"twilio-secret".to_vec(),
            ResilientSender::new(
                Arc::new(TokenBucket::new(TokenBucketConfig {
                    requests: 100,
                    period: Duration::from_secs(1),
                    burst: 0,
                })),
                Arc::new(CircuitBreaker::new(
                    ProviderDomain::Messaging,
                    CircuitBreakerConfig::default(),
                )),
                RetryConfig::default(),
            ),
        )
    }

    #[test]
    fn normalizes_simple_reply() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "from": "+15551234567",
            "text": "Yes I confirm",
            "messageSid": "SM123"
        }))
        .unwrap();
        let msg = adapter().normalize(&raw).unwrap();
        assert_eq!(msg.from_phone, "+15551234567");
        assert_eq!(msg.text, "Yes I confirm");
        assert_eq!(msg.idempotency_key, "SM123");
    }

    #[test]
    fn accepts_twilio_form_style_names() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "From": "+15551234567",
            "Body": "please reschedule me"
        }))
        .unwrap();
        let msg = adapter().normalize(&raw).unwrap();
        assert_eq!(msg.text, "please reschedule me");
        // No provider id: key is derived, not empty
        assert_eq!(msg.idempotency_key.len(), 64);
    }

    #[test]
    fn rejects_tampered_webhook() {
        let adapter = adapter();
        let raw = serde_json::to_vec(&serde_json::json!({
            "from": "+15551234567",
            "text": "Yes"
        }))
        .unwrap();
        let sig = adapter.verifier.sign(&raw);
        let mut tampered = raw.clone();
        tampered[3] ^= 0x20;
        assert!(adapter.handle_webhook(&tampered, Some(&sig)).is_err());
        assert!(adapter.handle_webhook(&raw, Some(&sig)).is_ok());
    }
}
