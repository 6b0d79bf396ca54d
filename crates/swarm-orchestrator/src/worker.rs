use crate::bus::{Mailbox, MessageBus};
use crate::executor::{ExecutionOutcome, ExecutorTable, SubtaskSpec};
use crate::registry::AgentRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{AgentId, Message, MessageKind, SwarmError, Task, TaskId};
use tracing::{debug, error, warn};

/// What an agent reports back for a delegated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    Completed { result: serde_json::Value },
    Decompose { subtasks: Vec<SubtaskSpec> },
    Failed { reason: String },
}

/// Payload of a `completion_report` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub outcome: ReportOutcome,
}

/// The loop behind one agent: read delegations from the mailbox, execute,
/// report back. Handles one task at a time.
pub(crate) struct AgentWorker {
    pub(crate) agent_id: AgentId,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) executors: Arc<ExecutorTable>,
}

impl AgentWorker {
    pub(crate) async fn run(self, mut mailbox: Mailbox) {
        debug!(agent_id = %self.agent_id, "Agent worker started");
        while let Some(message) = mailbox.recv().await {
            match message.kind {
                MessageKind::TaskDelegation => self.handle_delegation(&message).await,
                MessageKind::StatusUpdate | MessageKind::KnowledgeShare => {
                    debug!(agent_id = %self.agent_id, kind = ?message.kind, from = %message.sender, "Agent received notice");
                    if message.requires_response {
                        let ack = serde_json::json!({"agent_id": self.agent_id, "ack": true});
                        if let Err(e) = self.bus.respond(&message, ack).await {
                            warn!(agent_id = %self.agent_id, error = %e, "Failed to acknowledge message");
                        }
                    }
                }
                MessageKind::CompletionReport => {
                    warn!(agent_id = %self.agent_id, message_id = %message.id, "Agent received a completion report; ignoring");
                }
            }
        }
        debug!(agent_id = %self.agent_id, "Agent worker stopped");
    }

    async fn handle_delegation(&self, message: &Message) {
        let task: Task = match serde_json::from_value(message.payload.clone()) {
            Ok(task) => task,
            Err(e) => {
                error!(agent_id = %self.agent_id, error = %e, "Malformed task delegation");
                return;
            }
        };
        let Some(outcome) = self.execute(task.id).await else {
            return;
        };
        let report = CompletionReport {
            task_id: task.id,
            agent_id: self.agent_id,
            outcome,
        };
        let payload = match serde_json::to_value(&report) {
            Ok(payload) => payload,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to encode completion report");
                return;
            }
        };
        if let Err(e) = self
            .bus
            .send(message.reply(MessageKind::CompletionReport, payload))
            .await
        {
            error!(task_id = %task.id, agent_id = %self.agent_id, error = %e, "Completion report undeliverable");
        }
    }

    /// Run the task through the executor table. `None` when the task was
    /// cancelled before this agent got to it.
    async fn execute(&self, task_id: TaskId) -> Option<ReportOutcome> {
        let task = match self.registry.mark_in_progress(task_id).await {
            Ok(task) => task,
            Err(e) => {
                debug!(task_id = %task_id, agent_id = %self.agent_id, reason = %e, "Skipping delegation");
                return None;
            }
        };
        let agent = match self.registry.get_agent(self.agent_id).await {
            Ok(agent) => agent,
            Err(e) => {
                return Some(ReportOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };
        let executor = match self.executors.resolve(agent.agent_type) {
            Ok(executor) => executor,
            Err(e) => {
                return Some(ReportOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        };

        let limit = agent.resource_limits.task_timeout_ms;
        debug!(task_id = %task_id, agent_id = %self.agent_id, "Executing task");
        // A separate task so that a panicking executor cannot take the worker down.
        let handle = tokio::spawn(async move { executor.execute(&agent, &task).await });
        let abort = handle.abort_handle();
        let joined = match limit {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Some(ReportOutcome::Failed {
                        reason: SwarmError::Timeout { timeout_ms: ms }.to_string(),
                    });
                }
            },
            None => handle.await,
        };

        Some(match joined {
            Ok(Ok(ExecutionOutcome::Completed(result))) => ReportOutcome::Completed { result },
            Ok(Ok(ExecutionOutcome::Decompose(subtasks))) => ReportOutcome::Decompose { subtasks },
            Ok(Err(e)) => ReportOutcome::Failed {
                reason: e.to_string(),
            },
            Err(join) if join.is_panic() => {
                error!(task_id = %task_id, agent_id = %self.agent_id, "Executor panicked");
                ReportOutcome::Failed {
                    reason: "executor panicked".to_string(),
                }
            }
            Err(_) => ReportOutcome::Failed {
                reason: "executor aborted".to_string(),
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_format() {
        let report = CompletionReport {
            task_id: uuid::Uuid::new_v4(),
            agent_id: uuid::Uuid::new_v4(),
            outcome: ReportOutcome::Decompose {
                subtasks: vec![SubtaskSpec::new("half")],
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "decompose");
        assert_eq!(json["subtasks"][0]["description"], "half");
        let parsed: CompletionReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_failed_report_carries_reason() {
        let json = serde_json::json!({
            "task_id": uuid::Uuid::nil(),
            "agent_id": uuid::Uuid::nil(),
            "outcome": "failed",
            "reason": "executor panicked",
        });
        let parsed: CompletionReport = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.outcome,
            ReportOutcome::Failed {
                reason: "executor panicked".into()
            }
        );
    }
}
