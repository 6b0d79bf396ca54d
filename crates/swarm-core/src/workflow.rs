use crate::types::{AgentId, AgentType, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five SPARC phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SparcPhase {
    Specification,
    Pseudocode,
    Architecture,
    Refinement,
    Completion,
}

impl SparcPhase {
    pub const ALL: [SparcPhase; 5] = [
        SparcPhase::Specification,
        SparcPhase::Pseudocode,
        SparcPhase::Architecture,
        SparcPhase::Refinement,
        SparcPhase::Completion,
    ];

    /// Agent type that works this phase. Refinement also re-dispatches to
    /// implementation between review iterations.
    pub fn agent_type(&self) -> AgentType {
        match self {
            SparcPhase::Specification => AgentType::Research,
            SparcPhase::Pseudocode | SparcPhase::Architecture => AgentType::Architect,
            SparcPhase::Refinement => AgentType::Review,
            SparcPhase::Completion => AgentType::Implementation,
        }
    }

    /// Specification and Completion always run.
    pub fn is_optional(&self) -> bool {
        !matches!(self, SparcPhase::Specification | SparcPhase::Completion)
    }

    pub fn objective(&self) -> &'static str {
        match self {
            SparcPhase::Specification => "Analyze requirements and create detailed specification",
            SparcPhase::Pseudocode => "Generate pseudocode for the solution",
            SparcPhase::Architecture => "Design system architecture and components",
            SparcPhase::Refinement => "Refine and optimize the solution",
            SparcPhase::Completion => "Final validation and completion",
        }
    }
}

impl std::fmt::Display for SparcPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SparcPhase::Specification => write!(f, "specification"),
            SparcPhase::Pseudocode => write!(f, "pseudocode"),
            SparcPhase::Architecture => write!(f, "architecture"),
            SparcPhase::Refinement => write!(f, "refinement"),
            SparcPhase::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Disabled by configuration; never executed.
    Skipped,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::InProgress => write!(f, "in_progress"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall state of a workflow. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Output of one completed phase, as appended to the compiled result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: SparcPhase,
    pub agent_type: AgentType,
    pub agent_id: Option<AgentId>,
    pub output: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// Payload of a terminal workflow failure. The partial results hold every
/// phase that completed before the failure, so no work is silently lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub workflow_id: WorkflowId,
    pub failed_phase: SparcPhase,
    pub reason: String,
    pub partial_results: Vec<PhaseResult>,
}

impl WorkflowFailure {
    /// The furthest phase that completed before the failure, if any.
    pub fn furthest_completed(&self) -> Option<SparcPhase> {
        self.partial_results.last().map(|r| r.phase)
    }
}
