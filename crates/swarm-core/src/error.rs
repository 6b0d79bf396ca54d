use crate::types::{AgentId, AgentType, TaskId, WorkflowId};
use crate::workflow::WorkflowFailure;
use thiserror::Error;

/// Convenience alias for results produced anywhere in the swarm.
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Top-level error type for the orchestration core.
///
/// Variants map onto the failure taxonomy: recoverable dispatch conditions,
/// caller errors, bus delivery failures, phase/workflow failures and the
/// decomposition safety valve.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// No idle agent of the requested type. Callers queue and retry.
    #[error("no available {agent_type} agent")]
    NoAvailableAgent { agent_type: AgentType },

    /// The system-wide in-progress cap is reached. Callers queue and retry.
    #[error("worker pool saturated ({limit} tasks in progress)")]
    WorkerPoolSaturated { limit: usize },

    /// Rejected synchronously: the caller supplied something invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The message bus exhausted its retries.
    #[error("delivery of message {message_id} to {recipient} failed after {attempts} attempts")]
    DeliveryFailed {
        message_id: uuid::Uuid,
        recipient: AgentId,
        attempts: u32,
    },

    /// A bounded wait (request/response, task await) expired.
    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// A SPARC phase did not finish within its timeout.
    #[error("phase {phase} timed out after {timeout_ms} ms")]
    PhaseTimeout { phase: String, timeout_ms: u64 },

    /// Terminal workflow failure carrying the partial results trail.
    #[error("workflow {} failed in phase {}: {}", .0.workflow_id, .0.failed_phase, .0.reason)]
    WorkflowFailed(Box<WorkflowFailure>),

    /// A boomerang decomposition would exceed the configured depth.
    #[error("task {task_id} cannot decompose at depth {depth} (max {max_depth})")]
    DecompositionDepthExceeded {
        task_id: TaskId,
        depth: u32,
        max_depth: u32,
    },

    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// A state change that the lifecycle rules forbid.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// A completed or failed workflow cannot be mutated.
    #[error("workflow {0} is terminal")]
    WorkflowTerminal(WorkflowId),

    /// The agent executor reported a failure.
    #[error("execution error: {0}")]
    Execution(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwarmError {
    /// Whether the condition is expected and worth queueing/retrying rather
    /// than surfacing as a failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwarmError::NoAvailableAgent { .. }
                | SwarmError::WorkerPoolSaturated { .. }
                | SwarmError::Timeout { .. }
                | SwarmError::PhaseTimeout { .. }
        )
    }

    /// The partial results trail when this is a workflow failure.
    pub fn workflow_failure(&self) -> Option<&WorkflowFailure> {
        match self {
            SwarmError::WorkflowFailed(failure) => Some(failure),
            _ => None,
        }
    }
}
