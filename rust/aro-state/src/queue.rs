//! Durable FIFO command queue and the time-scheduled fallback queue
//!
//! Both queues live in JSON files with atomic writes and at-least-once
//! semantics. A single lock per queue keeps the writer discipline; entries
//! are processed in enqueue order per tenant.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::StateResult;
use crate::jsonfile::JsonFileStore;
use aro_contracts::ExecutorCommand;

/// One queued dispatch with its retry bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub command: ExecutorCommand,
    pub attempts: u32,
    pub scheduled_for: DateTime<Utc>,
}

/// Durable FIFO queue of executor-bound commands
pub struct CommandQueue {
    file: JsonFileStore,
    entries: Mutex<Vec<QueueEntry>>,
}

impl CommandQueue {
    /// Open the queue, restoring any persisted entries
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let file = JsonFileStore::new(path);
        let entries: Vec<QueueEntry> = file.load_or(Vec::new)?;
        Ok(Self {
            file,
            entries: Mutex::new(entries),
        })
    }

    /// Append a command; it becomes dispatchable immediately
    pub fn enqueue(&self, command: ExecutorCommand) -> StateResult<()> {
        let mut entries = self.entries.lock();
        entries.push(QueueEntry {
            command,
            attempts: 0,
            scheduled_for: Utc::now(),
        });
        self.file.store(&*entries)
    }

    /// Entries whose schedule has elapsed, in enqueue order
    pub fn due(&self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.scheduled_for <= now)
            .cloned()
            .collect()
    }

    /// Remove a successfully dispatched command
    pub fn mark_success(&self, execution_id: Uuid) -> StateResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.command.execution_id != execution_id);
        self.file.store(&*entries)
    }

    /// Record a failed attempt and push the entry to `next_at`.
    ///
    /// Returns the new attempt count, or `None` when the entry vanished.
    pub fn mark_failed(
        &self,
        execution_id: Uuid,
        next_at: DateTime<Utc>,
    ) -> StateResult<Option<u32>> {
        let mut entries = self.entries.lock();
        let mut attempts = None;
        for entry in entries.iter_mut() {
            if entry.command.execution_id == execution_id {
                entry.attempts += 1;
                entry.scheduled_for = next_at;
                attempts = Some(entry.attempts);
                break;
            }
        }
        self.file.store(&*entries)?;
        Ok(attempts)
    }

    /// Remove an entry without success (dead-letter move)
    pub fn remove(&self, execution_id: Uuid) -> StateResult<Option<QueueEntry>> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| e.command.execution_id == execution_id);
        let removed = pos.map(|i| entries.remove(i));
        self.file.store(&*entries)?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// A deferred outbound send with the reason for the deferral
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEntry {
    pub command: ExecutorCommand,
    pub reason: String,
    pub scheduled_for: DateTime<Utc>,
}

/// Time-scheduled queue for sends deferred by an open circuit or an
/// exhausted rate limit
pub struct FallbackQueue {
    file: JsonFileStore,
    entries: Mutex<Vec<FallbackEntry>>,
}

impl FallbackQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let file = JsonFileStore::new(path);
        let entries: Vec<FallbackEntry> = file.load_or(Vec::new)?;
        Ok(Self {
            file,
            entries: Mutex::new(entries),
        })
    }

    pub fn defer(
        &self,
        command: ExecutorCommand,
        reason: impl Into<String>,
        scheduled_for: DateTime<Utc>,
    ) -> StateResult<()> {
        let mut entries = self.entries.lock();
        entries.push(FallbackEntry {
            command,
            reason: reason.into(),
            scheduled_for,
        });
        self.file.store(&*entries)
    }

    /// Remove and return entries whose schedule has elapsed
    pub fn drain_due(&self, now: DateTime<Utc>) -> StateResult<Vec<FallbackEntry>> {
        let mut entries = self.entries.lock();
        let (due, remaining): (Vec<_>, Vec<_>) =
            entries.drain(..).partition(|e| e.scheduled_for <= now);
        *entries = remaining;
        self.file.store(&*entries)?;
        Ok(due)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
