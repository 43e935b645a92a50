// Shared state for workers of one run
//
// A key/value store of JSON values. Writes are last-writer-wins and
// `update` is a read-modify-write that is not atomic with respect to
// concurrent writers. Entries expire after the TTL; expired entries read
// as absent and are purged lazily.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default lifetime of a state entry
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub set_by: String,
    pub timestamp: DateTime<Utc>,
}

impl StateEntry {
    fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp > ttl
    }
}

pub struct SharedStateStore {
    run_id: Uuid,
    ttl: chrono::Duration,
    entries: DashMap<String, StateEntry>,
}

impl SharedStateStore {
    pub fn new(run_id: Uuid, ttl: Duration) -> Self {
        Self {
            run_id,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(2)),
            entries: DashMap::new(),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, set_by: impl Into<String>) {
        let key = key.into();
        let set_by = set_by.into();
        tracing::debug!(run_id = %self.run_id, key = %key, set_by = %set_by, "Shared state set");

        self.entries.insert(
            key.clone(),
            StateEntry {
                key,
                value,
                set_by,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Full entry including writer and timestamp
    pub fn entry(&self, key: &str) -> Option<StateEntry> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(self.ttl, now));
        }
        None
    }

    /// Read-modify-write of a single key
    ///
    /// Not atomic: a concurrent `set` between the read and the write is
    /// overwritten.
    pub fn update<F>(&self, key: &str, f: F, set_by: impl Into<String>) -> serde_json::Value
    where
        F: FnOnce(Option<serde_json::Value>) -> serde_json::Value,
    {
        let current = self.get(key);
        let next = f(current);
        self.set(key, next.clone(), set_by);
        next
    }

    /// Live keys, sorted
    pub fn list_keys(&self) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Remove every entry, or only those written by `set_by`
    pub fn clear(&self, set_by: Option<&str>) -> usize {
        let before = self.entries.len();
        match set_by {
            Some(writer) => self.entries.retain(|_, entry| entry.set_by != writer),
            None => self.entries.clear(),
        }
        let removed = before.saturating_sub(self.entries.len());
        tracing::debug!(run_id = %self.run_id, writer = ?set_by, removed, "Shared state cleared");
        removed
    }

    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
    }

    /// Snapshot of all live entries
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.purge_expired();
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }
}
