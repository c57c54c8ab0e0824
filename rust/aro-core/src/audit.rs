//! Hash-chained audit log
//!
//! Append-only. Each entry's hash covers the entry content and the
//! previous entry's hash, so any tampering breaks the chain from that
//! point on. Verification recomputes the whole chain.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use aro_state::{JsonFileStore, StateResult};

use crate::error::CoreResult;

/// Genesis predecessor for the first entry
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Who acted: `system`, `admin:<user>`, `worker`
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Hash over the entry without its own hash, chained to the predecessor
    fn compute_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{}",
            self.id,
            self.timestamp.to_rfc3339(),
            self.actor,
            self.action,
            self.details
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether this entry's hash matches its content
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Result of a chain verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    /// Index of the first broken entry, when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
    pub entries: usize,
}

/// Append-only audit chain with durable storage
pub struct AuditChain {
    file: JsonFileStore,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditChain {
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let file = JsonFileStore::new(path);
        let entries: Vec<AuditEntry> = file.load_or(Vec::new)?;
        Ok(Self {
            file,
            entries: Mutex::new(entries),
        })
    }

    /// Append one entry, linking it to the chain head
    pub fn append(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        details: serde_json::Value,
    ) -> CoreResult<AuditEntry> {
        let mut entries = self.entries.lock();
        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            details,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entries.push(entry.clone());
        self.file.store(&*entries)?;
        Ok(entry)
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Recompute the chain and report the first break, if any
    pub fn verify(&self) -> ChainVerification {
        let entries = self.entries.lock();
        let mut previous = GENESIS_HASH.to_string();
        for (index, entry) in entries.iter().enumerate() {
            if entry.previous_hash != previous || !entry.verify() {
                return ChainVerification {
                    valid: false,
                    broken_at: Some(index),
                    entries: entries.len(),
                };
            }
            previous = entry.hash.clone();
        }
        ChainVerification {
            valid: true,
            broken_at: None,
            entries: entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(dir: &tempfile::TempDir) -> AuditChain {
        AuditChain::open(dir.path().join("audit.json")).unwrap()
    }

    #[test]
    fn chain_links_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let audit = chain(&dir);
        audit
            .append("system", "booking.ingested", serde_json::json!({"id": "a"}))
            .unwrap();
        audit
            .append("admin:root", "manual_override", serde_json::json!({"id": "b"}))
            .unwrap();

        let verification = audit.verify();
        assert!(verification.valid);
        assert_eq!(verification.entries, 2);

        let entries = audit.entries();
        assert_eq!(entries[1].previous_hash, entries[0].hash);
    }

    #[test]
    fn tampering_is_detected_at_the_right_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        {
            let audit = AuditChain::open(&path).unwrap();
            for i in 0..3 {
                audit
                    .append("system", "event", serde_json::json!({"i": i}))
                    .unwrap();
            }
        }

        // Tamper with the middle entry on disk
        let file = JsonFileStore::new(&path);
        let mut entries: Vec<AuditEntry> = file.load_or(Vec::new).unwrap();
        entries[1].details = serde_json::json!({"i": 999});
        file.store(&entries).unwrap();

        let audit = AuditChain::open(&path).unwrap();
        let verification = audit.verify();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at, Some(1));
    }

    #[test]
    fn chain_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        {
            let audit = AuditChain::open(&path).unwrap();
            audit
                .append("system", "consent.granted", serde_json::json!({}))
                .unwrap();
        }
        let audit = AuditChain::open(&path).unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit.verify().valid);
    }
}
