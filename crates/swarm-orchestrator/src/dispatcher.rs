use crate::config::{DispatcherConfig, LoadBalanceStrategy};
use crate::external::SkillCorrelator;
use crate::registry::{AgentAssignment, AgentRegistry};
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use swarm_core::{Agent, AgentId, AgentType, SwarmError, SwarmResult, Task, TaskId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Picks one agent among equally eligible candidates.
///
/// Candidates are idle agents of the task's type, in registry creation order.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, agent_type: AgentType, candidates: &[&Agent]) -> Option<AgentId>;
}

/// Cycles a per-type cursor over the candidates.
#[derive(Default)]
pub struct RoundRobin {
    cursors: SyncMutex<HashMap<AgentType, usize>>,
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, agent_type: AgentType, candidates: &[&Agent]) -> Option<AgentId> {
        if candidates.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(agent_type).or_insert(0);
        let picked = candidates[*cursor % candidates.len()].id;
        *cursor = cursor.wrapping_add(1);
        Some(picked)
    }
}

/// Fewest current tasks, ties broken by the oldest `last_active`.
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn select(&self, _agent_type: AgentType, candidates: &[&Agent]) -> Option<AgentId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.current_tasks
                    .len()
                    .cmp(&b.current_tasks.len())
                    .then_with(|| a.last_active.cmp(&b.last_active))
            })
            .map(|a| a.id)
    }
}

/// Uniform random pick.
pub struct RandomPick;

impl SelectionStrategy for RandomPick {
    fn select(&self, _agent_type: AgentType, candidates: &[&Agent]) -> Option<AgentId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].id)
    }
}

/// Build the strategy object for a configured policy.
pub fn strategy_for(strategy: LoadBalanceStrategy) -> Box<dyn SelectionStrategy> {
    match strategy {
        LoadBalanceStrategy::RoundRobin => Box::new(RoundRobin::default()),
        LoadBalanceStrategy::LeastLoaded => Box::new(LeastLoaded),
        LoadBalanceStrategy::Random => Box::new(RandomPick),
    }
}

/// Outcome of [`Dispatcher::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Assigned(AgentAssignment),
    /// No agent or no pool capacity right now; the task waits in the queue.
    Queued(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedTask {
    priority: i32,
    arrival: u64,
    task_id: TaskId,
    task_type: AgentType,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Matches pending tasks to idle agents through the registry.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    strategy: Box<dyn SelectionStrategy>,
    max_in_progress: usize,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    arrivals: AtomicU64,
    skills: Option<Arc<dyn SkillCorrelator>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, config: &DispatcherConfig) -> Self {
        Self::with_strategy(registry, strategy_for(config.strategy), config.max_in_progress)
    }

    pub fn with_strategy(
        registry: Arc<AgentRegistry>,
        strategy: Box<dyn SelectionStrategy>,
        max_in_progress: usize,
    ) -> Self {
        Self {
            registry,
            strategy,
            max_in_progress,
            queue: Mutex::new(BinaryHeap::new()),
            arrivals: AtomicU64::new(0),
            skills: None,
        }
    }

    /// Consult the skill correlation service before dispatch.
    pub fn with_skill_correlator(mut self, skills: Arc<dyn SkillCorrelator>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Register `task` and bind it to an idle agent now.
    ///
    /// `NoAvailableAgent` and `WorkerPoolSaturated` leave the task pending in
    /// the ledger; use [`submit`](Self::submit) to queue it automatically.
    /// A queued task of the same type and at least the same priority keeps
    /// its claim on the next free agent, so `delegate` reports
    /// `NoAvailableAgent` while one is waiting.
    pub async fn delegate(&self, task: Task) -> SwarmResult<AgentAssignment> {
        let (task_id, task_type, priority) = (task.id, task.task_type, task.priority);
        self.register(task).await?;
        if self.outranked(task_type, priority).await {
            return Err(SwarmError::NoAvailableAgent { agent_type: task_type });
        }
        self.try_assign(task_id).await
    }

    /// Register `task` and assign it, or queue it on a recoverable failure.
    pub async fn submit(&self, task: Task) -> SwarmResult<Submission> {
        let pending = task.clone();
        self.register(task).await?;
        self.assign_or_queue(&pending).await
    }

    /// Try to assign an already-registered pending task, queueing it if no
    /// agent or capacity is available.
    ///
    /// The task goes behind any queued task of its type with an equal or
    /// higher priority; call [`process_queue`](Self::process_queue) to hand
    /// out agents in queue order.
    pub async fn assign_or_queue(&self, task: &Task) -> SwarmResult<Submission> {
        if self.outranked(task.task_type, task.priority).await {
            debug!(task_id = %task.id, "Queueing task behind earlier work");
            self.enqueue(task).await;
            return Ok(Submission::Queued(task.id));
        }
        match self.try_assign(task.id).await {
            Ok(assignment) => Ok(Submission::Assigned(assignment)),
            Err(e) if e.is_recoverable() => {
                debug!(task_id = %task.id, reason = %e, "Queueing task");
                self.enqueue(task).await;
                Ok(Submission::Queued(task.id))
            }
            Err(e) => Err(e),
        }
    }

    /// Assign whatever queued tasks can be assigned, in priority then
    /// arrival order. Tasks that still cannot run keep their place.
    pub async fn process_queue(&self) -> Vec<AgentAssignment> {
        let mut queue = self.queue.lock().await;
        let mut assigned = Vec::new();
        let mut retained = Vec::new();
        while let Some(entry) = queue.pop() {
            match self.try_assign(entry.task_id).await {
                Ok(assignment) => assigned.push(assignment),
                Err(SwarmError::WorkerPoolSaturated { .. }) => {
                    retained.push(entry);
                    break;
                }
                Err(e) if e.is_recoverable() => retained.push(entry),
                Err(e) => {
                    // Cancelled or failed while queued; drop it.
                    debug!(task_id = %entry.task_id, reason = %e, "Dropping queued task");
                }
            }
        }
        queue.extend(retained);
        if !assigned.is_empty() {
            info!(assigned = assigned.len(), remaining = queue.len(), "Processed task queue");
        }
        assigned
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Queued task ids in the order they would be dispatched.
    pub async fn queued(&self) -> Vec<TaskId> {
        let queue = self.queue.lock().await;
        let mut entries: Vec<&QueuedTask> = queue.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.task_id).collect()
    }

    /// Drop a task from the queue. Returns whether it was queued.
    pub async fn dequeue(&self, task_id: TaskId) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|e| e.task_id != task_id);
        queue.len() != before
    }

    async fn register(&self, mut task: Task) -> SwarmResult<()> {
        if let Some(skills) = &self.skills {
            match skills.analyze_required_skills(&task.description).await {
                Ok(found) => task.required_skills = found,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Skill analysis unavailable; dispatching without annotation");
                }
            }
        }
        debug!(task_id = %task.id, task_type = %task.task_type, priority = task.priority, "Registering task");
        self.registry.insert_task(task).await
    }

    async fn try_assign(&self, task_id: TaskId) -> SwarmResult<AgentAssignment> {
        let strategy = &self.strategy;
        self.registry
            .assign_with(task_id, self.max_in_progress, |agent_type, candidates| {
                strategy.select(agent_type, candidates)
            })
            .await
    }

    /// Whether a queued task of `task_type` would be dispatched first.
    async fn outranked(&self, task_type: AgentType, priority: i32) -> bool {
        self.queue
            .lock()
            .await
            .iter()
            .any(|e| e.task_type == task_type && e.priority >= priority)
    }

    async fn enqueue(&self, task: &Task) {
        let arrival = self.arrivals.fetch_add(1, AtomicOrdering::SeqCst);
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|e| e.task_id == task.id) {
            return;
        }
        queue.push(QueuedTask {
            priority: task.priority,
            arrival,
            task_id: task.id,
            task_type: task.task_type,
        });
    }
}
