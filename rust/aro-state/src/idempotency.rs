//! Inbound idempotency store
//!
//! Maps `source + providerEventId` to the response served for the first
//! delivery. A stored key means side effects ran at most once; on non-final
//! failure the key is released so a retry can run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

use crate::error::{StateError, StateResult};

/// Stored outcome of a deduplicated delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    pub stored_at: DateTime<Utc>,
    /// The response body served for the original delivery; `null` while
    /// processing is still in flight.
    pub response: Option<serde_json::Value>,
}

/// Idempotency store for inbound webhooks and commands
pub struct InboundIdempotencyStore {
    db: Db,
    ttl: Duration,
}

impl InboundIdempotencyStore {
    /// Minimum retention mandated for inbound keys
    pub const MIN_TTL_HOURS: i64 = 72;

    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let db = sled::open(path)
            .map_err(|e| StateError::Database(format!("Failed to open idempotency store: {}", e)))?;
        Ok(Self {
            db,
            ttl: Duration::hours(Self::MIN_TTL_HOURS),
        })
    }

    pub fn temporary() -> StateResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StateError::Database(format!("Failed to open idempotency store: {}", e)))?;
        Ok(Self {
            db,
            ttl: Duration::hours(Self::MIN_TTL_HOURS),
        })
    }

    /// Override the TTL; values below the 72 h floor are clamped up
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::hours(Self::MIN_TTL_HOURS));
        self
    }

    fn key(source: &str, provider_event_id: &str) -> String {
        format!("{}:{}", source, provider_event_id)
    }

    /// Claim a key for processing. Returns the stored response when the key
    /// is already held (duplicate delivery), `None` when the claim is fresh.
    pub fn claim(
        &self,
        source: &str,
        provider_event_id: &str,
    ) -> StateResult<Option<StoredResponse>> {
        let key = Self::key(source, provider_event_id);
        if let Some(bytes) = self.db.get(key.as_bytes())? {
            let stored: StoredResponse = serde_json::from_slice(&bytes)?;
            if Utc::now() - stored.stored_at < self.ttl {
                return Ok(Some(stored));
            }
            // Expired: fall through and reclaim
        }
        let fresh = StoredResponse {
            stored_at: Utc::now(),
            response: None,
        };
        self.db
            .insert(key.as_bytes(), serde_json::to_vec(&fresh)?)?;
        Ok(None)
    }

    /// Record the response served for the original delivery
    pub fn complete(
        &self,
        source: &str,
        provider_event_id: &str,
        response: serde_json::Value,
    ) -> StateResult<()> {
        let key = Self::key(source, provider_event_id);
        let stored = StoredResponse {
            stored_at: Utc::now(),
            response: Some(response),
        };
        self.db
            .insert(key.as_bytes(), serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    /// Release a key after a non-final failure so a retry can run
    pub fn release(&self, source: &str, provider_event_id: &str) -> StateResult<()> {
        self.db
            .remove(Self::key(source, provider_event_id).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_is_fresh_then_duplicate() {
        let store = InboundIdempotencyStore::temporary().unwrap();
        assert!(store.claim("calendly", "evt-1").unwrap().is_none());
        store
            .complete("calendly", "evt-1", serde_json::json!({"status": "accepted"}))
            .unwrap();

        let dup = store.claim("calendly", "evt-1").unwrap().unwrap();
        assert_eq!(dup.response.unwrap()["status"], "accepted");
    }

    #[test]
    fn release_permits_retry() {
        let store = InboundIdempotencyStore::temporary().unwrap();
        assert!(store.claim("twilio", "msg-1").unwrap().is_none());
        store.release("twilio", "msg-1").unwrap();
        assert!(store.claim("twilio", "msg-1").unwrap().is_none());
    }

    #[test]
    fn ttl_never_drops_below_floor() {
        let store = InboundIdempotencyStore::temporary()
            .unwrap()
            .with_ttl(Duration::hours(1));
        assert_eq!(store.ttl, Duration::hours(72));
    }

    #[test]
    fn sources_do_not_collide() {
        let store = InboundIdempotencyStore::temporary().unwrap();
        assert!(store.claim("calendly", "evt-1").unwrap().is_none());
        assert!(store.claim("stripe", "evt-1").unwrap().is_none());
    }
}
