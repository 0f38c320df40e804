use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One write to the blackboard, kept in the audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackboardEntry {
    pub key: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub value: serde_json::Value,
}

#[derive(Default)]
struct BoardState {
    entries: HashMap<String, serde_json::Value>,
    history: Vec<BlackboardEntry>,
}

/// Cycle-scoped key/value scratchpad shared by the steps of a decision cycle.
///
/// A write replaces the current value for its key and appends to the history,
/// both under the same lock. Callers hold it through an `Arc`.
#[derive(Default)]
pub struct Blackboard {
    state: Mutex<BoardState>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single push plus insert, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every entry and the history.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.history.clear();
    }

    pub fn write_value(&self, key: &str, author: &str, value: serde_json::Value) {
        let mut state = self.lock();
        state.history.push(BlackboardEntry {
            key: key.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
            value: value.clone(),
        });
        state.entries.insert(key.to_string(), value);
    }

    /// Serialize `value` and write it. A value that fails to serialize is
    /// logged and skipped.
    pub fn write<T: Serialize>(&self, key: &str, author: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.write_value(key, author, json),
            Err(e) => tracing::warn!("Blackboard: failed to serialize '{}' from {}: {}", key, author, e),
        }
    }

    pub fn read(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().entries.get(key).cloned()
    }

    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every write since the last [`clear`](Self::clear), oldest first.
    pub fn history(&self) -> Vec<BlackboardEntry> {
        self.lock().history.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
