//! Executor-side idempotent execution
//!
//! `executionId -> result event`, persisted atomically. A stored id means
//! the runtime ran at most once for it; duplicates are answered from here
//! without touching the runtime.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use aro_contracts::ExecutorResultEvent;
use aro_state::{JsonFileStore, StateResult};

use crate::error::ExecutorResult;

/// Durable map of completed executions
pub struct IdempotencyStore {
    file: JsonFileStore,
    entries: Mutex<HashMap<String, ExecutorResultEvent>>,
}

impl IdempotencyStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let file = JsonFileStore::new(path);
        let entries: HashMap<String, ExecutorResultEvent> = file.load_or(HashMap::new)?;
        Ok(Self {
            file,
            entries: Mutex::new(entries),
        })
    }

    /// Stored result for an execution id, when the runtime already ran
    pub fn get(&self, execution_id: Uuid) -> Option<ExecutorResultEvent> {
        self.entries.lock().get(&execution_id.to_string()).cloned()
    }

    /// Record the result of a completed execution
    pub fn put(&self, event: &ExecutorResultEvent) -> ExecutorResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(event.execution_id.to_string(), event.clone());
        self.file.store(&*entries)?;
        Ok(())
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

    #[test]
    fn results_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idempotency.json");
        let execution_id = Uuid::new_v4();

        let store = IdempotencyStore::open(&path).unwrap();
        let event = ExecutorResultEvent::succeeded(
            execution_id,
            "tenant-1",
            "corr-1",
            serde_json::json!({"acknowledgedCommandType": "integration.twilio.send_sms"}),
        );
        store.put(&event).unwrap();
        drop(store);

        let reopened = IdempotencyStore::open(&path).unwrap();
        let stored = reopened.get(execution_id).unwrap();
        assert_eq!(stored.event_id, event.event_id);
    }

    #[test]
    fn unknown_execution_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdempotencyStore::open(dir.path().join("i.json")).unwrap();
        assert!(store.get(Uuid::new_v4()).is_none());
    }
}
