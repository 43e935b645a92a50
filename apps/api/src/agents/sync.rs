// Synchronization barriers between workers
//
// Each sync point lives inside a `watch` channel. Releasing a participant
// publishes the new point state, which wakes every waiter so it can check
// whether it is still being waited for.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Waiting,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub name: String,
    pub coordination_id: Uuid,
    pub participants: Vec<String>,
    pub waiting_for: BTreeSet<String>,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SyncBarrier {
    points: DashMap<String, watch::Sender<SyncPoint>>,
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the named point, or reset it if it already exists
    ///
    /// Waiters on a reset point re-evaluate against the new participant set.
    pub fn synchronize(&self, name: &str, participants: &[String]) -> Uuid {
        let point = SyncPoint {
            name: name.to_string(),
            coordination_id: Uuid::new_v4(),
            participants: participants.to_vec(),
            waiting_for: participants.iter().cloned().collect(),
            status: if participants.is_empty() {
                SyncStatus::Completed
            } else {
                SyncStatus::Waiting
            },
            created_at: Utc::now(),
        };
        let coordination_id = point.coordination_id;

        match self.points.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                existing.get().send_replace(point);
            }
            Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(point);
                slot.insert(tx);
            }
        }

        tracing::debug!(
            sync_point = name,
            coordination_id = %coordination_id,
            participants = participants.len(),
            "Sync point created"
        );
        coordination_id
    }

    /// Suspend until `worker_id` is no longer waited for at `name`
    pub async fn wait(&self, name: &str, worker_id: &str) -> AgentResult<()> {
        let mut rx = self
            .points
            .get(name)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| AgentError::SyncPointNotFound(name.to_string()))?;

        rx.wait_for(|point| !point.waiting_for.contains(worker_id))
            .await
            .map(|_| ())
            .map_err(|_| AgentError::SyncPointNotFound(name.to_string()))
    }

    /// Mark `worker_id` as having reached the point
    ///
    /// Releasing a non-participant, or on a missing point, does nothing.
    pub fn release(&self, name: &str, worker_id: &str) {
        let Some(tx) = self.points.get(name) else {
            return;
        };

        let changed = tx.send_if_modified(|point| {
            if !point.waiting_for.remove(worker_id) {
                return false;
            }
            if point.waiting_for.is_empty() {
                point.status = SyncStatus::Completed;
            }
            true
        });

        if changed {
            let point = tx.borrow();
            tracing::debug!(
                sync_point = name,
                worker_id,
                remaining = point.waiting_for.len(),
                status = ?point.status,
                "Sync point released"
            );
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<SyncPoint> {
        self.points.get(name).map(|tx| tx.borrow().clone())
    }

    /// Drop a point; pending waiters fail with `SyncPointNotFound`
    pub fn remove(&self, name: &str) -> Option<SyncPoint> {
        self.points
            .remove(name)
            .map(|(_, tx)| tx.borrow().clone())
    }
}
