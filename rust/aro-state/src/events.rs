//! Durable canonical event log with monotonic replay cursors
//!
//! Cursors come from a persisted counter, so they are strictly increasing
//! across restarts. The log is globally ordered, which trivially satisfies
//! the per-aggregate ordering guarantee. Duplicate event ids are dropped.

use sled::Db;
use std::path::Path;

use crate::error::{StateError, StateResult};
use aro_contracts::{EventEnvelope, ReplayCursor};

const CURSOR_KEY: &[u8] = b"cursor";

/// Append-only event log backed by sled
pub struct EventLog {
    db: Db,
    events: sled::Tree,
    event_ids: sled::Tree,
    meta: sled::Tree,
}

impl EventLog {
    /// Open (or create) the log at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let db = sled::open(path)
            .map_err(|e| StateError::Database(format!("Failed to open event log: {}", e)))?;
        Self::from_db(db)
    }

    /// In-memory log for tests
    pub fn temporary() -> StateResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StateError::Database(format!("Failed to open event log: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StateResult<Self> {
        let events = db.open_tree("events")?;
        let event_ids = db.open_tree("event_ids")?;
        let meta = db.open_tree("meta")?;
        Ok(Self {
            db,
            events,
            event_ids,
            meta,
        })
    }

    fn next_cursor(&self) -> StateResult<u64> {
        let bytes = self.meta.update_and_fetch(CURSOR_KEY, |old| {
            let next = match old {
                Some(bytes) => u64::from_be_bytes(bytes.try_into().unwrap_or([0u8; 8])) + 1,
                None => 1,
            };
            Some(next.to_be_bytes().to_vec())
        })?;
        let bytes = bytes.ok_or_else(|| StateError::Database("cursor update lost".to_string()))?;
        Ok(u64::from_be_bytes(
            bytes
                .as_ref()
                .try_into()
                .map_err(|_| StateError::Database("corrupt cursor".to_string()))?,
        ))
    }

    /// Append an event, assigning its cursor.
    ///
    /// Returns `None` when an event with the same id was already appended
    /// (duplicate suppression).
    pub fn append(&self, mut event: EventEnvelope) -> StateResult<Option<EventEnvelope>> {
        let id_key = event.event_id.to_string();
        if self.event_ids.contains_key(id_key.as_bytes())? {
            return Ok(None);
        }
        let cursor = self.next_cursor()?;
        event.replay_cursor = ReplayCursor(cursor);
        let bytes = serde_json::to_vec(&event)?;
        self.events.insert(cursor.to_be_bytes(), bytes)?;
        self.event_ids
            .insert(id_key.as_bytes(), &cursor.to_be_bytes())?;
        Ok(Some(event))
    }

    /// Events for one tenant strictly after `after`, oldest first, up to
    /// `limit`. Returns the page and the cursor to resume from (the last
    /// event's cursor, or `after` when the page is empty).
    pub fn events_after(
        &self,
        tenant_id: &str,
        after: ReplayCursor,
        limit: usize,
    ) -> StateResult<(Vec<EventEnvelope>, ReplayCursor)> {
        let mut out = Vec::new();
        let start = (after.0 + 1).to_be_bytes();
        for item in self.events.range(start..) {
            let (_, value) = item?;
            let event: EventEnvelope = serde_json::from_slice(&value)?;
            if event.tenant_id == tenant_id {
                out.push(event);
                if out.len() >= limit {
                    break;
                }
            }
        }
        let next = out.last().map(|e| e.replay_cursor).unwrap_or(after);
        Ok((out, next))
    }

    /// Events for one aggregate id, in cursor order
    pub fn events_for_aggregate(&self, aggregate_id: &str) -> StateResult<Vec<EventEnvelope>> {
        let mut out = Vec::new();
        for item in self.events.iter() {
            let (_, value) = item?;
            let event: EventEnvelope = serde_json::from_slice(&value)?;
            if event.aggregate.id == aggregate_id {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// Total number of events in the log
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> StateResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
