//! Durable outbox of canonical result events
//!
//! Append-only and ordered. The append lands on disk before the HTTP
//! response is written, so Core can always re-read what it was told.
//! Entries are retained until explicitly pruned.

use parking_lot::Mutex;
use std::path::Path;

use aro_contracts::ExecutorResultEvent;
use aro_state::{JsonFileStore, StateResult};

use crate::error::ExecutorResult;

/// Append-only result-event log
pub struct Outbox {
    file: JsonFileStore,
    entries: Mutex<Vec<ExecutorResultEvent>>,
}

impl Outbox {
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let file = JsonFileStore::new(path);
        let entries: Vec<ExecutorResultEvent> = file.load_or(Vec::new)?;
        Ok(Self {
            file,
            entries: Mutex::new(entries),
        })
    }

    /// Append one result event and flush
    pub fn append(&self, event: &ExecutorResultEvent) -> ExecutorResult<()> {
        let mut entries = self.entries.lock();
        entries.push(event.clone());
        self.file.store(&*entries)?;
        Ok(())
    }

    /// All events in append order
    pub fn entries(&self) -> Vec<ExecutorResultEvent> {
        self.entries.lock().clone()
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
    use uuid::Uuid;

    #[test]
    fn appends_preserve_order_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");

        let outbox = Outbox::open(&path).unwrap();
        let first = ExecutorResultEvent::succeeded(
            Uuid::new_v4(),
            "tenant-1",
            "corr-1",
            serde_json::json!({}),
        );
        let second =
            ExecutorResultEvent::failed(Uuid::new_v4(), "tenant-1", "corr-2", "timeout");
        outbox.append(&first).unwrap();
        outbox.append(&second).unwrap();
        drop(outbox);

        let reopened = Outbox::open(&path).unwrap();
        let entries = reopened.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_id, first.event_id);
        assert_eq!(entries[1].event_id, second.event_id);
    }
}
