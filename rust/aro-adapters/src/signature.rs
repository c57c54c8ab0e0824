//! Webhook signature verification and idempotency-key derivation
//!
//! Signatures are HMAC-SHA256 over the raw request body, compared with a
//! constant-time equality so verification never leaks timing.

use chrono::{DateTime, DurationRound, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AdapterError, AdapterResult};

type HmacSha256 = Hmac<Sha256>;

/// Verify a hex-encoded HMAC-SHA256 signature over `raw_body`
pub fn verify_hmac_sha256(secret: &[u8], raw_body: &[u8], signature_hex: &str) -> AdapterResult<()> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|_| AdapterError::SignatureInvalid("signature is not hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| AdapterError::SignatureInvalid("invalid secret length".to_string()))?;
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(AdapterError::SignatureInvalid(
            "signature mismatch".to_string(),
        ))
    }
}

/// Shared verifier carried by each adapter
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    /// Header carrying the signature, e.g. `X-Webhook-Signature`
    pub header_name: &'static str,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, header_name: &'static str) -> Self {
        Self {
            secret: secret.into(),
            header_name,
        }
    }

    /// Reject on missing or mismatched signature
    pub fn verify(&self, raw_body: &[u8], signature: Option<&str>) -> AdapterResult<()> {
        let signature = signature.ok_or_else(|| {
            AdapterError::SignatureInvalid(format!("missing {} header", self.header_name))
        })?;
        verify_hmac_sha256(&self.secret, raw_body, signature)
    }

    /// Sign a body; used by tests and by outbound webhook emission
    pub fn sign(&self, raw_body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Idempotency key for an inbound delivery: the provider event id when the
/// provider sends one, otherwise a digest of source, canonical payload and
/// a coarse (hourly) timestamp so storms of identical retries collapse.
pub fn derive_idempotency_key(
    source: &str,
    provider_event_id: Option<&str>,
    canonical_payload: &str,
    received_at: DateTime<Utc>,
) -> String {
    if let Some(id) = provider_event_id {
        if !id.trim().is_empty() {
            return id.to_string();
        }
    }
    let coarse = received_at
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap_or(received_at);
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(canonical_payload.as_bytes());
    hasher.update(coarse.timestamp().to_be_bytes());
    hex::encode(hasher.finalize())
}
