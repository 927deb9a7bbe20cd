//! Progress reporting
//!
//! Progress entries are broadcast to any number of observers. Reporting never
//! blocks and never fails: with no subscribers the entry is simply dropped,
//! and slow subscribers lose their oldest entries.

use super::types::OperationKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Completion percentage of a finished operation
pub const COMPLETED: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    InProgress,
    Completed,
    Failed,
}

/// One progress record of an operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub key: OperationKey,
    pub state: ProgressState,
    /// 0 to 100
    pub completion: u8,
    pub message: String,
    pub created: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn in_progress(key: &OperationKey, completion: u8, message: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            state: ProgressState::InProgress,
            completion: completion.min(COMPLETED),
            message: message.into(),
            created: Utc::now(),
        }
    }

    pub fn completed(key: &OperationKey, message: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            state: ProgressState::Completed,
            completion: COMPLETED,
            message: message.into(),
            created: Utc::now(),
        }
    }
}

/// Broadcasts progress entries and remembers the latest one per operation
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressEntry>,
    latest: Mutex<HashMap<OperationKey, ProgressEntry>>,
}

impl ProgressReporter {
    /// Create a reporter buffering up to `capacity` entries per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an entry; returns how many subscribers received it
    pub fn report(&self, entry: ProgressEntry) -> usize {
        if let Ok(mut latest) = self.latest.lock() {
            latest.insert(entry.key.clone(), entry.clone());
        }
        self.tx.send(entry).unwrap_or(0)
    }

    /// Receive all future entries
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEntry> {
        self.tx.subscribe()
    }

    /// Most recent entry reported for an operation
    pub fn last_progress(&self, key: &OperationKey) -> Option<ProgressEntry> {
        self.latest.lock().ok().and_then(|latest| latest.get(key).cloned())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(100)
    }
}
