use crate::error::SwarmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub type AgentId = Uuid;
pub type TaskId = Uuid;
pub type WorkflowId = Uuid;

/// The closed set of specialised agent kinds in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Gathers information and analyses requirements.
    Research,
    /// Designs systems and writes technical plans.
    Architect,
    /// Writes and executes code.
    Implementation,
    /// Creates and runs tests.
    Testing,
    /// Reviews work and requests revisions.
    Review,
    /// Writes documentation.
    Documentation,
    /// Troubleshoots failures.
    Debugger,
}

impl AgentType {
    /// Every canonical agent type, in seeding order.
    pub const ALL: [AgentType; 7] = [
        AgentType::Research,
        AgentType::Architect,
        AgentType::Implementation,
        AgentType::Testing,
        AgentType::Review,
        AgentType::Documentation,
        AgentType::Debugger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Research => "research",
            AgentType::Architect => "architect",
            AgentType::Implementation => "implementation",
            AgentType::Testing => "testing",
            AgentType::Review => "review",
            AgentType::Documentation => "documentation",
            AgentType::Debugger => "debugger",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentType::Research => "Conducts research, gathers information, and analyzes data",
            AgentType::Architect => {
                "Designs system architecture and creates technical specifications"
            }
            AgentType::Implementation => "Implements code and executes development tasks",
            AgentType::Testing => "Creates and executes tests, validates functionality",
            AgentType::Review => "Reviews code, architecture, and provides feedback",
            AgentType::Documentation => "Creates and maintains documentation",
            AgentType::Debugger => "Debugs issues and provides troubleshooting assistance",
        }
    }

    /// Capability tags an agent of this type gets when none are supplied.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentType::Research => &["search", "analyze", "summarize", "compare"],
            AgentType::Architect => &["design", "plan", "review-architecture", "create-diagrams"],
            AgentType::Implementation => &["code", "execute", "refactor", "integrate"],
            AgentType::Testing => &["test", "validate", "benchmark", "report-issues"],
            AgentType::Review => &[
                "review-code",
                "review-architecture",
                "provide-feedback",
                "suggest-improvements",
            ],
            AgentType::Documentation => &["write-docs", "update-docs", "create-examples", "explain"],
            AgentType::Debugger => &["debug", "troubleshoot", "analyze-logs", "suggest-fixes"],
        }
    }

    /// Display label used in generated agent names ("Research", "Debugger").
    pub fn label(&self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        AgentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| SwarmError::InvalidConfig(format!("unknown agent type '{s}'")))
    }
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Learning,
    Error,
    Maintenance,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Learning => write!(f, "learning"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Limits declared when an agent is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Upper bound on a single task's execution time, if any.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

/// Running performance counters for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    /// Fraction of finished tasks that completed successfully (0.0..=1.0).
    pub success_rate: f64,
    pub average_duration_ms: u64,
}

impl AgentMetrics {
    /// Fold a successful task of the given duration into the running average.
    pub fn record_completion(&mut self, duration_ms: u64) {
        self.tasks_completed += 1;
        let n = u64::from(self.tasks_completed);
        self.average_duration_ms = if n == 1 {
            duration_ms
        } else {
            (self.average_duration_ms * (n - 1) + duration_ms) / n
        };
        self.refresh_success_rate();
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.refresh_success_rate();
    }

    fn refresh_success_rate(&mut self) {
        let total = self.tasks_completed + self.tasks_failed;
        self.success_rate = if total == 0 {
            0.0
        } else {
            f64::from(self.tasks_completed) / f64::from(total)
        };
    }
}

/// An agent in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub agent_type: AgentType,
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    /// Ordered, de-duplicated capability tags.
    pub capabilities: Vec<String>,
    /// Tasks currently assigned to or executing on this agent.
    pub current_tasks: Vec<TaskId>,
    pub metrics: AgentMetrics,
    pub resource_limits: ResourceLimits,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        agent_type: AgentType,
        ordinal: u64,
        capabilities: Vec<String>,
        resource_limits: ResourceLimits,
    ) -> Self {
        let capabilities = if capabilities.is_empty() {
            agent_type
                .default_capabilities()
                .iter()
                .map(|c| (*c).to_string())
                .collect()
        } else {
            dedup_preserving_order(capabilities)
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_type,
            name: format!("{} Agent {ordinal}", agent_type.label()),
            description: agent_type.description().to_string(),
            status: AgentStatus::Idle,
            capabilities,
            current_tasks: Vec::new(),
            metrics: AgentMetrics::default(),
            resource_limits,
            created_at: now,
            last_active: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    /// Waiting on boomerang children.
    Blocked,
    Completed,
    Failed { reason: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed { .. })
    }

    /// Whether an agent must list this task in its `current_tasks`.
    pub fn holds_agent(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A unit of work routed to an agent of `task_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: AgentType,
    pub description: String,
    /// Higher values are dispatched first.
    pub priority: i32,
    pub status: TaskStatus,
    /// Non-owning reference to the boomerang parent.
    #[serde(default)]
    pub parent: Option<TaskId>,
    /// Depth in the delegation tree (0 = root).
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub assigned_agent: Option<AgentId>,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    /// Skill tags from the skill correlation service, if consulted.
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: AgentType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            description: description.into(),
            priority: 0,
            status: TaskStatus::Pending,
            parent: None,
            depth: 0,
            input: None,
            result: None,
            assigned_agent: None,
            workflow_id: None,
            required_skills: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Build a boomerang child that references `parent` one level deeper.
    pub fn child_of(parent: &Task, task_type: AgentType, description: impl Into<String>) -> Self {
        let mut child = Task::new(task_type, description).with_priority(parent.priority);
        child.parent = Some(parent.id);
        child.depth = parent.depth + 1;
        child.input = parent.input.clone();
        child.workflow_id = parent.workflow_id;
        child
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_round_trip_names() {
        for t in AgentType::ALL {
            assert_eq!(t.to_string().parse::<AgentType>().unwrap(), t);
        }
        assert_eq!(" Review ".parse::<AgentType>().unwrap(), AgentType::Review);
    }

    #[test]
    fn test_unknown_agent_type_is_invalid_config() {
        let err = "oracle".parse::<AgentType>().unwrap_err();
        assert!(matches!(err, SwarmError::InvalidConfig(_)));
    }

    #[test]
    fn test_agent_defaults() {
        let agent = Agent::new(AgentType::Research, 1, Vec::new(), ResourceLimits::default());
        assert_eq!(agent.name, "Research Agent 1");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.has_capability("search"));
        assert!(agent.current_tasks.is_empty());
    }

    #[test]
    fn test_capabilities_deduplicated_in_order() {
        let caps = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let agent = Agent::new(AgentType::Debugger, 2, caps, ResourceLimits::default());
        assert_eq!(agent.capabilities, vec!["b", "a"]);
    }

    #[test]
    fn test_metrics_running_average() {
        let mut metrics = AgentMetrics::default();
        metrics.record_completion(100);
        metrics.record_completion(300);
        assert_eq!(metrics.average_duration_ms, 200);
        metrics.record_failure();
        assert_eq!(metrics.tasks_failed, 1);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_task_status_predicates() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed { reason: "x".into() }.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
        assert!(TaskStatus::Assigned.holds_agent());
        assert!(TaskStatus::InProgress.holds_agent());
        assert!(!TaskStatus::Blocked.holds_agent());
    }

    #[test]
    fn test_child_inherits_from_parent() {
        let wf = Uuid::new_v4();
        let parent = Task::new(AgentType::Architect, "design")
            .with_priority(5)
            .with_input(serde_json::json!({"k": 1}))
            .with_workflow(wf);
        let child = Task::child_of(&parent, AgentType::Implementation, "part");
        assert_eq!(child.parent, Some(parent.id));
        assert_eq!(child.depth, 1);
        assert_eq!(child.priority, 5);
        assert_eq!(child.workflow_id, Some(wf));
        assert_eq!(child.input, parent.input);
    }

    #[test]
    fn test_task_status_serialization() {
        let status = TaskStatus::Failed {
            reason: "timeout".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("timeout"));
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
