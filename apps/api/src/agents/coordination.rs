// Coordination facade over the message bus, shared state and barriers
//
// Workers of one run share a single `CoordinationManager`. It is created
// per run by the orchestrator and dropped with the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::AgentResult;
use super::messages::{Message, MessageBus, MessageType};
use super::state::SharedStateStore;
use super::sync::SyncBarrier;
use super::types::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Initiated,
    Accepted,
}

/// Work passed from one role to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub coordination_id: Uuid,
    pub from_agent: String,
    pub from_role: AgentRole,
    pub to_role: AgentRole,
    pub data: serde_json::Value,
    pub reason: String,
    pub status: HandoffStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CoordinationManager {
    bus: Arc<MessageBus>,
    state: Arc<SharedStateStore>,
    barrier: Arc<SyncBarrier>,
    handoffs: Arc<DashMap<Uuid, Handoff>>,
}

impl CoordinationManager {
    pub fn new(bus: Arc<MessageBus>, state: Arc<SharedStateStore>, barrier: Arc<SyncBarrier>) -> Self {
        Self {
            bus,
            state,
            barrier,
            handoffs: Arc::new(DashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn state(&self) -> &Arc<SharedStateStore> {
        &self.state
    }

    pub fn barrier(&self) -> &Arc<SyncBarrier> {
        &self.barrier
    }

    /// Create a sync point and notify every participant directly
    pub async fn synchronize_agents(
        &self,
        initiator_id: &str,
        initiator_role: AgentRole,
        sync_point: &str,
        participants: &[Uuid],
    ) -> AgentResult<Uuid> {
        let names: Vec<String> = participants.iter().map(Uuid::to_string).collect();
        let coordination_id = self.barrier.synchronize(sync_point, &names);

        for participant in participants {
            let message = Message::builder(initiator_id, initiator_role, MessageType::Coordination)
                .to_worker(*participant)
                .content(serde_json::json!({
                    "coordination_type": "synchronization",
                    "sync_point": sync_point,
                    "coordination_id": coordination_id,
                }))
                .priority(3)
                .build()?;
            self.bus.publish(message).await;
        }

        tracing::info!(
            run_id = %self.bus.run_id(),
            sync_point,
            participants = participants.len(),
            "Agents synchronizing"
        );
        Ok(coordination_id)
    }

    pub async fn wait_for_sync(&self, sync_point: &str, worker_id: Uuid) -> AgentResult<()> {
        self.barrier.wait(sync_point, &worker_id.to_string()).await
    }

    pub fn release_from_sync(&self, sync_point: &str, worker_id: Uuid) {
        self.barrier.release(sync_point, &worker_id.to_string());
    }

    /// Record a handoff and announce it on the coordination channel
    pub async fn orchestrate_handoff(
        &self,
        from_agent: &str,
        from_role: AgentRole,
        to_role: AgentRole,
        data: serde_json::Value,
        reason: &str,
    ) -> AgentResult<Uuid> {
        let coordination_id = Uuid::new_v4();
        let handoff = Handoff {
            coordination_id,
            from_agent: from_agent.to_string(),
            from_role,
            to_role,
            data: data.clone(),
            reason: reason.to_string(),
            status: HandoffStatus::Initiated,
            timestamp: Utc::now(),
        };
        self.handoffs.insert(coordination_id, handoff);

        self.bus
            .coordinate_action(
                from_agent,
                from_role,
                "handoff",
                &[],
                serde_json::json!({
                    "coordination_id": coordination_id,
                    "to_role": to_role,
                    "handoff_data": data,
                    "reason": reason,
                }),
            )
            .await?;

        tracing::info!(
            run_id = %self.bus.run_id(),
            coordination_id = %coordination_id,
            from = %from_role,
            to = %to_role,
            "Handoff initiated"
        );
        Ok(coordination_id)
    }

    /// Mark a handoff as picked up; returns false for unknown ids
    pub fn accept_handoff(&self, coordination_id: Uuid) -> bool {
        match self.handoffs.get_mut(&coordination_id) {
            Some(mut handoff) => {
                handoff.status = HandoffStatus::Accepted;
                true
            }
            None => false,
        }
    }

    pub fn handoff(&self, coordination_id: Uuid) -> Option<Handoff> {
        self.handoffs.get(&coordination_id).map(|h| h.clone())
    }

    /// Handoffs not yet accepted for a role
    pub fn pending_handoffs(&self, to_role: AgentRole) -> Vec<Handoff> {
        self.handoffs
            .iter()
            .filter(|h| h.to_role == to_role && h.status == HandoffStatus::Initiated)
            .map(|h| h.clone())
            .collect()
    }

    pub fn cleanup(&self) {
        self.state.clear(None);
        self.handoffs.clear();
    }
}
