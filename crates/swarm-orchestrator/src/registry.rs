use crate::config::RegistryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use swarm_core::{
    Agent, AgentId, AgentStatus, AgentType, ResourceLimits, SwarmError, SwarmResult, Task,
    TaskId, TaskStatus,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Filter for [`AgentRegistry::list_agents`]. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentFilter {
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn by_type(agent_type: AgentType) -> Self {
        Self {
            agent_type: Some(agent_type),
            status: None,
        }
    }

    pub fn by_status(status: AgentStatus) -> Self {
        Self {
            agent_type: None,
            status: Some(status),
        }
    }

    fn matches(&self, agent: &Agent) -> bool {
        self.agent_type.map_or(true, |t| agent.agent_type == t)
            && self.status.map_or(true, |s| agent.status == s)
    }
}

/// Filter for [`AgentRegistry::list_tasks`]. Empty fields match everything;
/// a status matches by kind, so any `Failed` reason matches `Failed`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub workflow_id: Option<uuid::Uuid>,
    pub status: Option<TaskStatus>,
    pub agent_type: Option<AgentType>,
}

impl TaskFilter {
    pub fn by_workflow(workflow_id: uuid::Uuid) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    fn matches(&self, task: &Task) -> bool {
        self.workflow_id.map_or(true, |w| task.workflow_id == Some(w))
            && self.agent_type.map_or(true, |t| task.task_type == t)
            && self.status.as_ref().map_or(true, |s| {
                std::mem::discriminant(s) == std::mem::discriminant(&task.status)
            })
    }
}

/// The record of a task being bound to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub assigned_at: DateTime<Utc>,
}

/// Point-in-time counters for the whole swarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmStats {
    pub total_agents: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub unavailable_agents: usize,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub blocked_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Pending tasks waiting in the dispatcher queue. The registry alone
    /// cannot see the queue and reports 0.
    #[serde(default)]
    pub queued_tasks: usize,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    /// Agent ids in creation order.
    order: Vec<AgentId>,
    tasks: HashMap<TaskId, Task>,
    task_order: Vec<TaskId>,
    next_ordinal: u64,
}

impl RegistryState {
    fn spawn_agent(
        &mut self,
        agent_type: AgentType,
        capabilities: Vec<String>,
        limits: ResourceLimits,
    ) -> Agent {
        self.next_ordinal += 1;
        let agent = Agent::new(agent_type, self.next_ordinal, capabilities, limits);
        self.order.push(agent.id);
        self.agents.insert(agent.id, agent.clone());
        agent
    }

    fn count_of_type(&self, agent_type: AgentType) -> usize {
        self.agents
            .values()
            .filter(|a| a.agent_type == agent_type)
            .count()
    }

    fn active_tasks(&self) -> usize {
        self.tasks.values().filter(|t| t.status.holds_agent()).count()
    }

    /// Drop `task_id` from its agent and return the agent to idle once it
    /// holds nothing else.
    fn release_agent(&mut self, task_id: TaskId, agent_id: AgentId, outcome: Release) {
        let Some(agent) = self.agents.get_mut(&agent_id) else {
            return;
        };
        agent.current_tasks.retain(|t| *t != task_id);
        match outcome {
            Release::Completed { duration_ms } => agent.metrics.record_completion(duration_ms),
            Release::Failed => agent.metrics.record_failure(),
            Release::Handoff => {}
        }
        agent.last_active = Utc::now();
        if agent.current_tasks.is_empty() && agent.status == AgentStatus::Busy {
            agent.status = AgentStatus::Idle;
        }
    }

    fn task_mut(&mut self, task_id: TaskId) -> SwarmResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))
    }
}

#[derive(Debug, Clone, Copy)]
enum Release {
    Completed { duration_ms: u64 },
    Failed,
    /// Agent handed the task on (boomerang) without finishing it.
    Handoff,
}

/// Single source of truth for agents and task assignment.
///
/// Agents and the task ledger sit behind one reader/writer lock so that an
/// assignment updates the agent and the task atomically.
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    max_agents_per_type: usize,
}

impl AgentRegistry {
    /// Create a registry, seeding one agent of every canonical type unless
    /// the config disables it.
    pub fn new(config: &RegistryConfig) -> Self {
        let mut state = RegistryState::default();
        if config.seed_default_pool {
            for agent_type in AgentType::ALL {
                let agent = state.spawn_agent(agent_type, Vec::new(), ResourceLimits::default());
                info!(agent_id = %agent.id, agent_type = %agent_type, name = %agent.name, "Seeded default agent");
            }
        }
        for agent_type in &config.agents {
            let agent = state.spawn_agent(*agent_type, Vec::new(), ResourceLimits::default());
            info!(agent_id = %agent.id, agent_type = %agent_type, name = %agent.name, "Created configured agent");
        }
        Self {
            state: RwLock::new(state),
            max_agents_per_type: config.max_agents_per_type,
        }
    }

    pub async fn create_agent(
        &self,
        agent_type: AgentType,
        capabilities: Vec<String>,
        limits: ResourceLimits,
    ) -> SwarmResult<Agent> {
        if limits.task_timeout_ms == Some(0) {
            return Err(SwarmError::InvalidConfig(
                "task_timeout_ms must be positive".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        if state.count_of_type(agent_type) >= self.max_agents_per_type {
            return Err(SwarmError::InvalidConfig(format!(
                "maximum number of {agent_type} agents ({}) reached",
                self.max_agents_per_type
            )));
        }
        let agent = state.spawn_agent(agent_type, capabilities, limits);
        info!(agent_id = %agent.id, agent_type = %agent_type, name = %agent.name, "Created agent");
        Ok(agent)
    }

    /// Like [`create_agent`](Self::create_agent) but parses the type name.
    pub async fn create_agent_by_name(
        &self,
        type_name: &str,
        capabilities: Vec<String>,
        limits: ResourceLimits,
    ) -> SwarmResult<Agent> {
        let agent_type: AgentType = type_name.parse()?;
        self.create_agent(agent_type, capabilities, limits).await
    }

    pub async fn get_agent(&self, id: AgentId) -> SwarmResult<Agent> {
        let state = self.state.read().await;
        state
            .agents
            .get(&id)
            .cloned()
            .ok_or(SwarmError::AgentNotFound(id))
    }

    /// Agents matching `filter`, in creation order.
    pub async fn list_agents(&self, filter: AgentFilter) -> Vec<Agent> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.agents.get(id))
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    pub async fn agent_count(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Agent self-reported status change.
    ///
    /// `busy` is owned by assignment: it can only be "set" on an agent that
    /// already holds tasks, and any other status is refused while it does.
    pub async fn update_status(&self, id: AgentId, status: AgentStatus) -> SwarmResult<Agent> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or(SwarmError::AgentNotFound(id))?;
        let holding = agent.current_tasks.len();
        match (status, holding) {
            (AgentStatus::Busy, 0) => {
                return Err(SwarmError::IllegalTransition(format!(
                    "agent {id} cannot be busy without tasks"
                )))
            }
            (AgentStatus::Busy, _) => {}
            (_, 0) => {
                debug!(agent_id = %id, from = %agent.status, to = %status, "Agent status change");
                agent.status = status;
                agent.last_active = Utc::now();
            }
            (_, n) => {
                return Err(SwarmError::IllegalTransition(format!(
                    "agent {id} holds {n} task(s); cannot become {status}"
                )))
            }
        }
        Ok(agent.clone())
    }

    /// Remove an agent from the pool.
    ///
    /// Without `force`, agents holding tasks are refused, as is the last
    /// agent of its type. With `force`, in-flight tasks are failed and
    /// returned so the caller can resubmit them. The last remaining agent is
    /// never removed.
    pub async fn delete_agent(&self, id: AgentId, force: bool) -> SwarmResult<Vec<TaskId>> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get(&id)
            .ok_or(SwarmError::AgentNotFound(id))?;
        if state.agents.len() == 1 {
            return Err(SwarmError::IllegalTransition(format!(
                "refusing to delete agent {id}: it is the last agent in the pool"
            )));
        }
        if !force && state.count_of_type(agent.agent_type) == 1 {
            return Err(SwarmError::IllegalTransition(format!(
                "refusing to delete agent {id}: it is the last {} agent; delete with force",
                agent.agent_type
            )));
        }
        let in_flight = agent.current_tasks.clone();
        if !in_flight.is_empty() && !force {
            return Err(SwarmError::IllegalTransition(format!(
                "agent {id} holds {} task(s); reassign them or delete with force",
                in_flight.len()
            )));
        }
        for task_id in &in_flight {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.status = TaskStatus::Failed {
                    reason: "agent deleted".to_string(),
                };
                task.completed_at = Some(Utc::now());
                task.assigned_agent = None;
            }
        }
        state.agents.remove(&id);
        state.order.retain(|a| *a != id);
        if in_flight.is_empty() {
            info!(agent_id = %id, "Deleted agent");
        } else {
            warn!(agent_id = %id, failed_tasks = in_flight.len(), "Force-deleted agent with in-flight tasks");
        }
        Ok(in_flight)
    }

    // --- Task ledger ---

    /// Record a new pending task.
    pub async fn insert_task(&self, mut task: Task) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(SwarmError::IllegalTransition(format!(
                "task {} already registered",
                task.id
            )));
        }
        if task.status != TaskStatus::Pending {
            return Err(SwarmError::IllegalTransition(format!(
                "task {} must be pending to be registered, was {}",
                task.id, task.status
            )));
        }
        task.assigned_agent = None;
        state.task_order.push(task.id);
        state.tasks.insert(task.id, task);
        Ok(())
    }

    pub async fn get_task(&self, id: TaskId) -> SwarmResult<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(SwarmError::TaskNotFound(id))
    }

    /// Tasks in registration order that match the filter.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    /// Bind a pending task to an idle agent of its type.
    ///
    /// `pick` chooses among the eligible agents (idle, matching type, in
    /// creation order). The whole selection runs under the write lock, so two
    /// concurrent calls can never pick the same idle agent.
    pub async fn assign_with<F>(
        &self,
        task_id: TaskId,
        max_active: usize,
        pick: F,
    ) -> SwarmResult<AgentAssignment>
    where
        F: FnOnce(AgentType, &[&Agent]) -> Option<AgentId>,
    {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Pending {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is {}, not pending",
                task.status
            )));
        }
        let agent_type = task.task_type;
        if state.active_tasks() >= max_active {
            return Err(SwarmError::WorkerPoolSaturated { limit: max_active });
        }

        let agent_id = {
            let eligible: Vec<&Agent> = state
                .order
                .iter()
                .filter_map(|id| state.agents.get(id))
                .filter(|a| a.agent_type == agent_type && a.is_idle())
                .collect();
            pick(agent_type, &eligible)
                .filter(|picked| eligible.iter().any(|a| a.id == *picked))
                .ok_or(SwarmError::NoAvailableAgent { agent_type })?
        };

        let now = Utc::now();
        if let Some(agent) = state.agents.get_mut(&agent_id) {
            agent.status = AgentStatus::Busy;
            agent.current_tasks.push(task_id);
            agent.last_active = now;
        }
        let task = state.task_mut(task_id)?;
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent_id);

        debug!(task_id = %task_id, agent_id = %agent_id, agent_type = %agent_type, "Task assigned");
        Ok(AgentAssignment {
            task_id,
            agent_id,
            agent_type,
            assigned_at: now,
        })
    }

    /// The assigned agent has started executing.
    pub async fn mark_in_progress(&self, task_id: TaskId) -> SwarmResult<Task> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if task.status != TaskStatus::Assigned {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is {}, not assigned",
                task.status
            )));
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Complete an executing or blocked task and release its agent.
    pub async fn complete_task(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> SwarmResult<Task> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if !matches!(
            task.status,
            TaskStatus::Assigned | TaskStatus::InProgress | TaskStatus::Blocked
        ) {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is {}; cannot complete",
                task.status
            )));
        }
        let now = Utc::now();
        let held_by = task.status.holds_agent().then_some(task.assigned_agent).flatten();
        let duration_ms = task
            .started_at
            .map(|s| (now - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(now);
        let snapshot = task.clone();
        if let Some(agent_id) = held_by {
            state.release_agent(task_id, agent_id, Release::Completed { duration_ms });
        }
        Ok(snapshot)
    }

    /// Fail any non-terminal task, releasing its agent if one holds it.
    pub async fn fail_task(&self, task_id: TaskId, reason: impl Into<String>) -> SwarmResult<Task> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if task.status.is_terminal() {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is already {}",
                task.status
            )));
        }
        let held_by = task.status.holds_agent().then_some(task.assigned_agent).flatten();
        task.status = TaskStatus::Failed {
            reason: reason.into(),
        };
        task.completed_at = Some(Utc::now());
        let snapshot = task.clone();
        if let Some(agent_id) = held_by {
            state.release_agent(task_id, agent_id, Release::Failed);
        }
        Ok(snapshot)
    }

    /// Park an executing task while its boomerang children run. The agent is
    /// released since it no longer works on it.
    pub async fn block_task(&self, task_id: TaskId) -> SwarmResult<Task> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if !task.status.holds_agent() {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is {}; only executing tasks can block",
                task.status
            )));
        }
        let held_by = task.assigned_agent;
        task.status = TaskStatus::Blocked;
        let snapshot = task.clone();
        if let Some(agent_id) = held_by {
            state.release_agent(task_id, agent_id, Release::Handoff);
        }
        Ok(snapshot)
    }

    pub async fn stats(&self) -> SwarmStats {
        let state = self.state.read().await;
        let mut stats = SwarmStats {
            total_agents: state.agents.len(),
            total_tasks: state.tasks.len(),
            ..SwarmStats::default()
        };
        for agent in state.agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle_agents += 1,
                AgentStatus::Busy => stats.busy_agents += 1,
                _ => stats.unavailable_agents += 1,
            }
        }
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Assigned | TaskStatus::InProgress => stats.active_tasks += 1,
                TaskStatus::Blocked => stats.blocked_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed { .. } => stats.failed_tasks += 1,
            }
        }
        stats
    }

    /// Agents and aggregate counters as JSON, for dashboards.
    pub async fn to_json(&self) -> serde_json::Value {
        let agents = self.list_agents(AgentFilter::default()).await;
        let stats = self.stats().await;
        serde_json::json!({
            "agents": agents,
            "stats": stats,
        })
    }

    /// Every breach of the agent/task agreement invariant. Empty when the
    /// ledger is consistent.
    pub async fn consistency_violations(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut violations = Vec::new();
        for agent in state.agents.values() {
            let busy = agent.status == AgentStatus::Busy;
            if busy != !agent.current_tasks.is_empty() {
                violations.push(format!(
                    "agent {} is {} with {} task(s)",
                    agent.id,
                    agent.status,
                    agent.current_tasks.len()
                ));
            }
            for task_id in &agent.current_tasks {
                match state.tasks.get(task_id) {
                    Some(t) if t.status.holds_agent() && t.assigned_agent == Some(agent.id) => {}
                    Some(t) => violations.push(format!(
                        "agent {} lists task {task_id} which is {}",
                        agent.id, t.status
                    )),
                    None => violations.push(format!(
                        "agent {} lists unknown task {task_id}",
                        agent.id
                    )),
                }
            }
        }
        for task in state.tasks.values() {
            if !task.status.holds_agent() {
                continue;
            }
            let listed = task
                .assigned_agent
                .and_then(|a| state.agents.get(&a))
                .is_some_and(|a| a.current_tasks.contains(&task.id));
            if !listed {
                violations.push(format!(
                    "task {} is {} but no agent lists it",
                    task.id, task.status
                ));
            }
        }
        violations
    }
}
