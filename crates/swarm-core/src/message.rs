use crate::types::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Endpoint id of the orchestrator on the message bus.
pub const ORCHESTRATOR_ENDPOINT: Uuid = Uuid::nil();

/// What a bus message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Orchestrator hands a task to an agent.
    TaskDelegation,
    StatusUpdate,
    KnowledgeShare,
    /// Agent reports the outcome of a delegated task.
    CompletionReport,
}

/// Queue priority. Only matters when a mailbox is backlogged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A message exchanged between agents and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: AgentId,
    /// Single recipient. Broadcasts clone the message once per recipient.
    pub recipient: AgentId,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub requires_response: bool,
    /// Number of delivery retries spent so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Id of the request this message answers, for request/response.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        sender: AgentId,
        recipient: AgentId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipient,
            kind,
            payload,
            priority: MessagePriority::Normal,
            requires_response: false,
            retry_count: 0,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Build the reply to this message, addressed back to its sender.
    pub fn reply(&self, kind: MessageKind, payload: serde_json::Value) -> Self {
        let mut reply = Message::new(self.recipient, self.sender, kind, payload)
            .with_priority(self.priority);
        reply.correlation_id = Some(self.id);
        reply
    }

    /// Copy of this message addressed to a different recipient, with a fresh id.
    pub fn readdressed(&self, recipient: AgentId) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4();
        copy.recipient = recipient;
        copy.retry_count = 0;
        copy
    }
}
