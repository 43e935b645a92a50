// Agent message passing system
//
// Run-scoped publish/subscribe channels: one broadcast channel, one
// coordination channel and one private channel per registered worker.
// Every subscriber owns an unbounded queue, so a subscriber sees every
// message published on its channel after it subscribed, in publish order.
// Nothing is backfilled for late subscribers.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::types::AgentRole;

/// Default retention window for message history
pub const DEFAULT_MESSAGE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    AgentToAgent,
    Broadcast,
    StatusUpdate,
    DataShare,
    RequestHelp,
    OfferHelp,
    TaskDelegation,
    Coordination,
}

/// Addressee of a message; a message without one is a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    Worker(Uuid),
    Role(AgentRole),
}

/// Immutable message exchanged between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    sender_id: String,
    sender_role: AgentRole,
    recipient: Option<Recipient>,
    message_type: MessageType,
    content: serde_json::Value,
    timestamp: DateTime<Utc>,
    priority: u8,
    reply_to: Option<Uuid>,
}

impl Message {
    pub fn builder(
        sender_id: impl Into<String>,
        sender_role: AgentRole,
        message_type: MessageType,
    ) -> MessageBuilder {
        MessageBuilder {
            sender_id: sender_id.into(),
            sender_role,
            message_type,
            recipient: None,
            content: serde_json::json!({}),
            priority: 1,
            reply_to: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sender_role(&self) -> AgentRole {
        self.sender_role
    }

    pub fn recipient(&self) -> Option<Recipient> {
        self.recipient
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn reply_to(&self) -> Option<Uuid> {
        self.reply_to
    }
}

/// Builder enforcing the message invariants
pub struct MessageBuilder {
    sender_id: String,
    sender_role: AgentRole,
    message_type: MessageType,
    recipient: Option<Recipient>,
    content: serde_json::Value,
    priority: u8,
    reply_to: Option<Uuid>,
}

impl MessageBuilder {
    pub fn to_worker(mut self, worker_id: Uuid) -> Self {
        self.recipient = Some(Recipient::Worker(worker_id));
        self
    }

    pub fn to_role(mut self, role: AgentRole) -> Self {
        self.recipient = Some(Recipient::Role(role));
        self
    }

    pub fn recipient(mut self, recipient: Option<Recipient>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn reply_to(mut self, message_id: Uuid) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// Validates and freezes the message
    ///
    /// # Business Rules
    /// - Priority must be within 1..=5
    /// - A `Broadcast` message cannot name a recipient
    pub fn build(self) -> AgentResult<Message> {
        if !(1..=5).contains(&self.priority) {
            return Err(AgentError::InvalidMessage(format!(
                "priority must be between 1 and 5, got {}",
                self.priority
            )));
        }
        if self.message_type == MessageType::Broadcast && self.recipient.is_some() {
            return Err(AgentError::InvalidMessage(
                "broadcast messages cannot have a recipient".to_string(),
            ));
        }

        Ok(Message {
            id: Uuid::new_v4(),
            sender_id: self.sender_id,
            sender_role: self.sender_role,
            recipient: self.recipient,
            message_type: self.message_type,
            content: self.content,
            timestamp: Utc::now(),
            priority: self.priority,
            reply_to: self.reply_to,
        })
    }
}

/// Channel within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Broadcast,
    Coordination,
    Worker(Uuid),
}

impl Channel {
    /// Fully qualified, run-scoped channel name
    pub fn name(&self, run_id: Uuid) -> String {
        match self {
            Channel::Broadcast => format!("run:{run_id}:broadcast"),
            Channel::Coordination => format!("run:{run_id}:coordination"),
            Channel::Worker(worker_id) => format!("run:{run_id}:worker:{worker_id}"),
        }
    }
}

/// Inbound stream of messages for one subscriber
pub struct Subscription {
    channel: Channel,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next message, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Filter for [`MessageBus::history`]
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Messages sent by, or addressed directly to, this agent
    pub agent_id: Option<String>,
    pub message_type: Option<MessageType>,
    /// Most recent N entries; `None` returns everything retained
    pub limit: Option<usize>,
}

/// Retention-bounded audit trail of everything published in a run
#[derive(Debug)]
pub struct MessageHistory {
    retention: chrono::Duration,
    entries: VecDeque<Message>,
}

impl MessageHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            entries: VecDeque::new(),
        }
    }

    pub fn record(&mut self, message: Message, now: DateTime<Utc>) {
        self.prune(now);
        self.entries.push_back(message);
    }

    /// Evict entries older than the retention window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while self
            .entries
            .front()
            .is_some_and(|m| m.timestamp < cutoff)
        {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn query(&self, filter: &HistoryFilter) -> Vec<Message> {
        let matching: Vec<&Message> = self
            .entries
            .iter()
            .filter(|m| {
                filter.message_type.map_or(true, |t| m.message_type == t)
                    && filter.agent_id.as_deref().map_or(true, |agent| {
                        m.sender_id == agent
                            || matches!(m.recipient, Some(Recipient::Worker(id)) if id.to_string() == agent)
                    })
            })
            .collect();

        let skip = filter
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }
}

/// Publish/subscribe bus scoped to a single run
pub struct MessageBus {
    run_id: Uuid,
    subscribers: DashMap<Channel, Vec<mpsc::UnboundedSender<Message>>>,
    workers: DashMap<Uuid, AgentRole>,
    history: Mutex<MessageHistory>,
}

impl MessageBus {
    pub fn new(run_id: Uuid, retention: Duration) -> Self {
        Self {
            run_id,
            subscribers: DashMap::new(),
            workers: DashMap::new(),
            history: Mutex::new(MessageHistory::new(retention)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Register a worker so role-addressed messages reach it
    ///
    /// Returns the worker's private channel.
    pub fn register_worker(&self, worker_id: Uuid, role: AgentRole) -> Channel {
        self.workers.insert(worker_id, role);
        let channel = Channel::Worker(worker_id);
        tracing::debug!(
            run_id = %self.run_id,
            worker_id = %worker_id,
            role = %role,
            channel = %channel.name(self.run_id),
            "Worker registered on message bus"
        );
        channel
    }

    pub fn unregister_worker(&self, worker_id: Uuid) {
        self.workers.remove(&worker_id);
        self.subscribers.remove(&Channel::Worker(worker_id));
    }

    /// Workers currently registered for a role
    pub fn workers_with_role(&self, role: AgentRole) -> Vec<Uuid> {
        self.workers
            .iter()
            .filter(|entry| *entry.value() == role)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(channel).or_default().push(tx);
        Subscription {
            channel,
            receiver: rx,
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscribers
            .get(&channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Route a message to its channel(s) and record it in history
    pub async fn publish(&self, message: Message) -> Uuid {
        let channels: Vec<Channel> = match message.recipient {
            Some(Recipient::Worker(worker_id)) => vec![Channel::Worker(worker_id)],
            Some(Recipient::Role(role)) => self
                .workers_with_role(role)
                .into_iter()
                .map(Channel::Worker)
                .collect(),
            None => vec![Channel::Broadcast],
        };

        self.deliver(&channels, message).await
    }

    /// Publish on the coordination channel regardless of recipient
    pub async fn announce(&self, message: Message) -> Uuid {
        self.deliver(&[Channel::Coordination], message).await
    }

    async fn deliver(&self, channels: &[Channel], message: Message) -> Uuid {
        let id = message.id;
        let mut delivered = 0usize;

        for channel in channels {
            if let Some(mut senders) = self.subscribers.get_mut(channel) {
                senders.retain(|tx| tx.send(message.clone()).is_ok());
                delivered += senders.len();
            }
        }

        tracing::debug!(
            run_id = %self.run_id,
            message_id = %id,
            sender = %format!("{}:{}", message.sender_role, message.sender_id),
            message_type = ?message.message_type,
            delivered,
            "Message published"
        );

        self.history.lock().await.record(message, Utc::now());
        id
    }

    pub async fn history(&self, filter: &HistoryFilter) -> Vec<Message> {
        let mut history = self.history.lock().await;
        history.prune(Utc::now());
        history.query(filter)
    }

    pub async fn broadcast_status_update(
        &self,
        agent_id: &str,
        role: AgentRole,
        status: &str,
        progress: Option<f32>,
        current_task: Option<&str>,
        metadata: serde_json::Value,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::StatusUpdate)
            .content(serde_json::json!({
                "status": status,
                "progress": progress,
                "current_task": current_task,
                "metadata": metadata,
            }))
            .build()?;
        Ok(self.publish(message).await)
    }

    pub async fn request_help(
        &self,
        agent_id: &str,
        role: AgentRole,
        problem_description: &str,
        required_skills: Vec<String>,
        urgency: &str,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::RequestHelp)
            .content(serde_json::json!({
                "problem_description": problem_description,
                "required_skills": required_skills,
                "urgency": urgency,
                "context": {},
            }))
            .priority(if urgency == "high" { 3 } else { 1 })
            .build()?;
        Ok(self.publish(message).await)
    }

    pub async fn offer_help(
        &self,
        agent_id: &str,
        role: AgentRole,
        help_request_id: Uuid,
        how_can_help: &str,
        estimated_minutes: Option<u32>,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::OfferHelp)
            .content(serde_json::json!({
                "help_request_id": help_request_id,
                "how_can_help": how_can_help,
                "estimated_time": estimated_minutes,
                "capabilities": [],
            }))
            .reply_to(help_request_id)
            .build()?;
        Ok(self.publish(message).await)
    }

    pub async fn share_data(
        &self,
        agent_id: &str,
        role: AgentRole,
        data: serde_json::Value,
        data_type: &str,
        recipient: Option<Uuid>,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::DataShare)
            .recipient(recipient.map(Recipient::Worker))
            .content(serde_json::json!({
                "data": data,
                "data_type": data_type,
                "description": format!("Shared {data_type} data"),
            }))
            .build()?;
        Ok(self.publish(message).await)
    }

    pub async fn delegate_task(
        &self,
        agent_id: &str,
        role: AgentRole,
        task_description: &str,
        recipient_role: AgentRole,
        requirements: serde_json::Value,
        deadline: Option<DateTime<Utc>>,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::TaskDelegation)
            .to_role(recipient_role)
            .content(serde_json::json!({
                "task_description": task_description,
                "requirements": requirements,
                "deadline": deadline,
                "priority": "normal",
            }))
            .priority(2)
            .build()?;
        Ok(self.publish(message).await)
    }

    pub async fn coordinate_action(
        &self,
        agent_id: &str,
        role: AgentRole,
        coordination_type: &str,
        participants: &[String],
        details: serde_json::Value,
    ) -> AgentResult<Uuid> {
        let message = Message::builder(agent_id, role, MessageType::Coordination)
            .content(serde_json::json!({
                "coordination_type": coordination_type,
                "participants": participants,
                "details": details,
                "initiator": agent_id,
            }))
            .priority(3)
            .build()?;
        Ok(self.announce(message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> MessageBus {
        MessageBus::new(Uuid::new_v4(), DEFAULT_MESSAGE_RETENTION)
    }

    fn note(n: i64) -> Message {
        Message::builder("sender", AgentRole::Code, MessageType::AgentToAgent)
            .content(serde_json::json!({ "n": n }))
            .build()
            .unwrap()
    }

    #[test]
    fn broadcast_with_recipient_is_rejected() {
        let result = Message::builder("a", AgentRole::Code, MessageType::Broadcast)
            .to_worker(Uuid::new_v4())
            .build();
        assert!(matches!(result, Err(AgentError::InvalidMessage(_))));
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        for priority in [0u8, 6] {
            let result = Message::builder("a", AgentRole::Code, MessageType::AgentToAgent)
                .priority(priority)
                .build();
            assert!(result.is_err());
        }
    }

    #[test]
    fn channel_names_are_run_scoped() {
        let run_id = Uuid::new_v4();
        let worker = Uuid::new_v4();
        assert_eq!(Channel::Broadcast.name(run_id), format!("run:{run_id}:broadcast"));
        assert_eq!(
            Channel::Worker(worker).name(run_id),
            format!("run:{run_id}:worker:{worker}")
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_each_subscriber_exactly_once() {
        let bus = bus();
        let mut first = bus.subscribe(Channel::Broadcast);
        let mut second = bus.subscribe(Channel::Broadcast);

        let message = Message::builder("lead", AgentRole::Orchestrator, MessageType::Broadcast)
            .content(serde_json::json!({ "a": 1 }))
            .build()
            .unwrap();
        let id = bus.publish(message).await;

        for sub in [&mut first, &mut second] {
            let got = sub.try_recv().expect("delivered");
            assert_eq!(got.id(), id);
            assert_eq!(got.content()["a"], 1);
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let bus = bus();
        let mut sub = bus.subscribe(Channel::Broadcast);

        for n in 0..50 {
            bus.publish(note(n)).await;
        }

        for n in 0..50 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got.content()["n"], n);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backfill() {
        let bus = bus();
        bus.publish(note(1)).await;

        let mut late = bus.subscribe(Channel::Broadcast);
        assert!(late.try_recv().is_none());

        bus.publish(note(2)).await;
        assert_eq!(late.try_recv().unwrap().content()["n"], 2);
    }

    #[tokio::test]
    async fn direct_message_only_reaches_recipient() {
        let bus = bus();
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        let target_channel = bus.register_worker(target, AgentRole::Code);
        let other_channel = bus.register_worker(other, AgentRole::Code);
        let mut target_sub = bus.subscribe(target_channel);
        let mut other_sub = bus.subscribe(other_channel);
        let mut broadcast = bus.subscribe(Channel::Broadcast);

        let message = Message::builder("lead", AgentRole::Orchestrator, MessageType::AgentToAgent)
            .to_worker(target)
            .build()
            .unwrap();
        bus.publish(message).await;

        assert!(target_sub.try_recv().is_some());
        assert!(other_sub.try_recv().is_none());
        assert!(broadcast.try_recv().is_none());
    }

    #[tokio::test]
    async fn role_message_fans_out_to_workers_of_that_role() {
        let bus = bus();
        let coder_a = Uuid::new_v4();
        let coder_b = Uuid::new_v4();
        let writer = Uuid::new_v4();
        let mut subs_a = bus.subscribe(bus.register_worker(coder_a, AgentRole::Code));
        let mut subs_b = bus.subscribe(bus.register_worker(coder_b, AgentRole::Code));
        let mut subs_w = bus.subscribe(bus.register_worker(writer, AgentRole::Writer));

        bus.delegate_task(
            "lead",
            AgentRole::Orchestrator,
            "write tests",
            AgentRole::Code,
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

        assert!(subs_a.try_recv().is_some());
        assert!(subs_b.try_recv().is_some());
        assert!(subs_w.try_recv().is_none());
    }

    #[tokio::test]
    async fn coordinate_action_uses_coordination_channel() {
        let bus = bus();
        let mut coordination = bus.subscribe(Channel::Coordination);
        let mut broadcast = bus.subscribe(Channel::Broadcast);

        bus.coordinate_action("lead", AgentRole::Orchestrator, "handoff", &[], serde_json::json!({}))
            .await
            .unwrap();

        let got = coordination.try_recv().unwrap();
        assert_eq!(got.message_type(), MessageType::Coordination);
        assert_eq!(got.priority(), 3);
        assert!(broadcast.try_recv().is_none());
    }

    #[tokio::test]
    async fn history_records_every_publish_and_filters() {
        let bus = bus();
        bus.publish(note(1)).await;
        bus.request_help("helper-seeker", AgentRole::Qa, "stuck", vec![], "high")
            .await
            .unwrap();
        bus.publish(note(2)).await;

        let all = bus.history(&HistoryFilter::default()).await;
        assert_eq!(all.len(), 3);

        let help = bus
            .history(&HistoryFilter {
                message_type: Some(MessageType::RequestHelp),
                ..Default::default()
            })
            .await;
        assert_eq!(help.len(), 1);
        assert_eq!(help[0].priority(), 3);

        let last = bus
            .history(&HistoryFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await;
        assert_eq!(last[0].content()["n"], 2);
    }

    #[test]
    fn history_prunes_entries_outside_retention() {
        let mut history = MessageHistory::new(Duration::from_secs(60));
        let old = note(1);
        let stamp = old.timestamp();
        history.record(old, stamp);
        assert_eq!(history.len(), 1);

        history.prune(stamp + chrono::Duration::seconds(61));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn dropped_subscription_is_cleaned_up() {
        let bus = bus();
        let sub = bus.subscribe(Channel::Broadcast);
        assert_eq!(bus.subscriber_count(Channel::Broadcast), 1);

        drop(sub);
        bus.publish(note(1)).await;
        assert_eq!(bus.subscriber_count(Channel::Broadcast), 0);
    }
}
