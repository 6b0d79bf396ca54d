use crate::boomerang::{BoomerangEngine, CANCELLED_REASON};
use crate::bus::{Mailbox, MessageBus};
use crate::config::SwarmConfig;
use crate::dispatcher::{Dispatcher, Submission};
use crate::executor::ExecutorTable;
use crate::external::Collaborators;
use crate::registry::{AgentAssignment, AgentRegistry, SwarmStats, TaskFilter};
use crate::team::TeamManager;
use crate::worker::{AgentWorker, CompletionReport, ReportOutcome};
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use swarm_core::{
    Agent, AgentId, AgentStatus, AgentType, Message, MessageKind, MessagePriority,
    ResourceLimits, SwarmError, SwarmResult, Task, TaskId, WorkflowId, ORCHESTRATOR_ENDPOINT,
};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pending follow-up inside [`Orchestrator::drive`].
enum Work {
    /// Task reached a terminal state.
    Settled(Task),
    /// Registered pending task to assign or queue.
    Dispatch(Task),
    Deliver(AgentAssignment),
}

/// Runs the agent pool: owns the registry, dispatcher, bus and boomerang
/// engine, keeps one worker per agent, and consumes completion reports.
///
/// Completion handling happens on a single control loop. Dropping the
/// orchestrator (or calling [`shutdown`](Self::shutdown)) stops every loop.
pub struct Orchestrator {
    config: SwarmConfig,
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<MessageBus>,
    executors: Arc<ExecutorTable>,
    boomerang: BoomerangEngine,
    teams: TeamManager,
    collaborators: Collaborators,
    waiters: Mutex<HashMap<TaskId, Vec<oneshot::Sender<Task>>>>,
    persisted: Mutex<HashMap<TaskId, String>>,
    workers: SyncMutex<HashMap<AgentId, JoinHandle<()>>>,
    control: SyncMutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Start an orchestrator with the built-in executors and no external
    /// services.
    pub async fn start(config: SwarmConfig) -> SwarmResult<Arc<Self>> {
        Self::start_with(config, None, Collaborators::default()).await
    }

    /// Start with custom executors (built-ins when `None`) and collaborators.
    pub async fn start_with(
        config: SwarmConfig,
        executors: Option<ExecutorTable>,
        collaborators: Collaborators,
    ) -> SwarmResult<Arc<Self>> {
        config.validate()?;
        let executors = executors.unwrap_or_else(|| ExecutorTable::builtin(&collaborators));
        let registry = Arc::new(AgentRegistry::new(&config.registry));
        let mut dispatcher = Dispatcher::new(registry.clone(), &config.dispatcher);
        if let Some(skills) = &collaborators.skills {
            dispatcher = dispatcher.with_skill_correlator(skills.clone());
        }

        let orchestrator = Arc::new(Self {
            registry: registry.clone(),
            dispatcher: Arc::new(dispatcher),
            bus: Arc::new(MessageBus::new(config.bus.clone())),
            executors: Arc::new(executors),
            boomerang: BoomerangEngine::new(registry, config.boomerang.clone()),
            teams: TeamManager::new(),
            collaborators,
            waiters: Mutex::new(HashMap::new()),
            persisted: Mutex::new(HashMap::new()),
            workers: SyncMutex::new(HashMap::new()),
            control: SyncMutex::new(None),
            config,
        });

        let mailbox = orchestrator.bus.register(ORCHESTRATOR_ENDPOINT).await;
        let handle = tokio::spawn(control_loop(Arc::downgrade(&orchestrator), mailbox));
        *orchestrator.control.lock() = Some(handle);

        for agent in orchestrator.registry.list_agents(Default::default()).await {
            orchestrator.spawn_worker(agent.id).await;
        }
        let agents = orchestrator.registry.agent_count().await;
        info!(
            agents,
            strategy = ?orchestrator.config.dispatcher.strategy,
            "Orchestrator started"
        );
        Ok(orchestrator)
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn teams(&self) -> &TeamManager {
        &self.teams
    }

    pub fn boomerang(&self) -> &BoomerangEngine {
        &self.boomerang
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    // --- Agents ---

    /// Add an agent to the pool and start its worker.
    pub async fn create_agent(
        &self,
        agent_type: AgentType,
        capabilities: Vec<String>,
        limits: ResourceLimits,
    ) -> SwarmResult<Agent> {
        let agent = self
            .registry
            .create_agent(agent_type, capabilities, limits)
            .await?;
        self.spawn_worker(agent.id).await;
        self.drive(VecDeque::new()).await;
        Ok(agent)
    }

    /// Remove an agent and stop its worker. With `force`, tasks it held are
    /// failed and their ids returned.
    pub async fn delete_agent(&self, id: AgentId, force: bool) -> SwarmResult<Vec<TaskId>> {
        let failed = self.registry.delete_agent(id, force).await?;
        self.bus.unregister(id).await;
        if let Some(handle) = self.workers.lock().remove(&id) {
            handle.abort();
        }
        self.teams.remove_member(id).await;

        let mut work = VecDeque::new();
        for task_id in &failed {
            if let Ok(task) = self.registry.get_task(*task_id).await {
                work.push_back(Work::Settled(task));
            }
        }
        self.drive(work).await;
        Ok(failed)
    }

    /// Agent self-report. An agent returning to idle picks up queued work.
    pub async fn update_agent_status(&self, id: AgentId, status: AgentStatus) -> SwarmResult<Agent> {
        let agent = self.registry.update_status(id, status).await?;
        if agent.is_idle() {
            self.drive(VecDeque::new()).await;
        }
        Ok(agent)
    }

    // --- Tasks ---

    /// Register a task and hand it to an agent, or queue it until one frees up.
    pub async fn submit_task(&self, task: Task) -> SwarmResult<TaskId> {
        let task_id = task.id;
        self.persist(&task).await;
        match self.dispatcher.submit(task).await? {
            Submission::Assigned(assignment) => {
                self.drive(VecDeque::from([Work::Deliver(assignment)])).await;
            }
            Submission::Queued(_) => {
                let queued = self.dispatcher.queue_len().await;
                info!(task_id = %task_id, queued, "Task queued");
                // Earlier queued work may be assignable now.
                self.drive(VecDeque::new()).await;
            }
        }
        Ok(task_id)
    }

    /// Wait for a task to finish. `None` uses the configured default timeout.
    pub async fn await_task(&self, task_id: TaskId, timeout: Option<Duration>) -> SwarmResult<Task> {
        let timeout = timeout.unwrap_or_else(|| self.config.tasks.default_timeout());
        let rx = {
            let mut waiters = self.waiters.lock().await;
            let task = self.registry.get_task(task_id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            let (tx, rx) = oneshot::channel();
            let entry = waiters.entry(task_id).or_default();
            entry.retain(|w| !w.is_closed());
            entry.push(tx);
            rx
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(task)) => Ok(task),
            Ok(Err(_)) => Err(SwarmError::Cancelled(format!(
                "orchestrator stopped while awaiting task {task_id}"
            ))),
            Err(_) => Err(SwarmError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Submit and wait in one call.
    pub async fn run_task(&self, task: Task, timeout: Option<Duration>) -> SwarmResult<Task> {
        let task_id = self.submit_task(task).await?;
        self.await_task(task_id, timeout).await
    }

    pub async fn get_task(&self, task_id: TaskId) -> SwarmResult<Task> {
        self.registry.get_task(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.registry.list_tasks(filter).await
    }

    /// Cancel a task and any boomerang children beneath it.
    ///
    /// Cooperative: an agent already executing it finishes and its report is
    /// discarded. Returns every task id that was cancelled.
    pub async fn cancel_task(&self, task_id: TaskId) -> SwarmResult<Vec<TaskId>> {
        let task = self.registry.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(SwarmError::IllegalTransition(format!(
                "task {task_id} is already {}",
                task.status
            )));
        }
        let mut cancelled = Vec::new();
        let mut work = VecDeque::new();
        for child in self.boomerang.cancel_subtree(task_id).await {
            self.dispatcher.dequeue(child).await;
            if let Ok(t) = self.registry.get_task(child).await {
                self.notify_waiters(&t).await;
            }
            cancelled.push(child);
        }
        self.dispatcher.dequeue(task_id).await;
        let task = self.registry.fail_task(task_id, CANCELLED_REASON).await?;
        cancelled.insert(0, task_id);
        work.push_back(Work::Settled(task));
        info!(task_id = %task_id, cancelled = cancelled.len(), "Task cancelled");
        self.drive(work).await;
        Ok(cancelled)
    }

    /// Cancel every unfinished task belonging to a workflow.
    pub async fn cancel_workflow_tasks(&self, workflow_id: WorkflowId) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        for task in self.registry.list_tasks(&TaskFilter::by_workflow(workflow_id)).await {
            if task.status.is_terminal() || cancelled.contains(&task.id) {
                continue;
            }
            // Children may already have gone down with their parent.
            if let Ok(ids) = self.cancel_task(task.id).await {
                cancelled.extend(ids);
            }
        }
        cancelled
    }

    /// Registry counters plus the dispatcher queue length.
    pub async fn stats(&self) -> SwarmStats {
        let mut stats = self.registry.stats().await;
        stats.queued_tasks = self.dispatcher.queue_len().await;
        stats
    }

    /// Stop every agent worker and the control loop.
    pub async fn shutdown(&self) {
        let workers: Vec<(AgentId, JoinHandle<()>)> = self.workers.lock().drain().collect();
        for (agent_id, handle) in workers {
            self.bus.unregister(agent_id).await;
            handle.abort();
        }
        self.bus.unregister(ORCHESTRATOR_ENDPOINT).await;
        if let Some(handle) = self.control.lock().take() {
            handle.abort();
        }
        info!("Orchestrator shut down");
    }

    // --- Internals ---

    async fn spawn_worker(&self, agent_id: AgentId) {
        let mailbox = self.bus.register(agent_id).await;
        let worker = AgentWorker {
            agent_id,
            bus: self.bus.clone(),
            registry: self.registry.clone(),
            executors: self.executors.clone(),
        };
        let handle = tokio::spawn(worker.run(mailbox));
        if let Some(old) = self.workers.lock().insert(agent_id, handle) {
            old.abort();
        }
    }

    async fn handle_report(&self, report: CompletionReport) {
        let task_id = report.task_id;
        let settled = match report.outcome {
            ReportOutcome::Completed { result } => self.registry.complete_task(task_id, result).await,
            ReportOutcome::Failed { reason } => {
                warn!(task_id = %task_id, agent_id = %report.agent_id, reason = %reason, "Task failed");
                self.registry.fail_task(task_id, reason).await
            }
            ReportOutcome::Decompose { subtasks } => {
                match self.boomerang.decompose(task_id, subtasks).await {
                    Ok(children) => {
                        for child in &children {
                            self.persist(child).await;
                        }
                        let work = children.into_iter().map(Work::Dispatch).collect();
                        self.drive(work).await;
                        return;
                    }
                    Err(e) => self.registry.fail_task(task_id, e.to_string()).await,
                }
            }
        };
        match settled {
            Ok(task) => {
                debug!(task_id = %task_id, status = %task.status, "Task settled");
                self.drive(VecDeque::from([Work::Settled(task)])).await;
            }
            // Cancelled while the agent was still working.
            Err(e) => debug!(task_id = %task_id, reason = %e, "Discarding stale report"),
        }
    }

    /// Process follow-up work until none is left and the queue cannot make
    /// progress.
    async fn drive(&self, mut work: VecDeque<Work>) {
        loop {
            while let Some(item) = work.pop_front() {
                match item {
                    Work::Settled(task) => {
                        self.notify_waiters(&task).await;
                        self.record_result(&task).await;
                        match self.boomerang.on_task_terminal(&task).await {
                            Ok(cascade) => {
                                work.extend(cascade.resolved.into_iter().map(Work::Settled));
                                work.extend(cascade.retries.into_iter().map(Work::Dispatch));
                            }
                            Err(e) => warn!(task_id = %task.id, error = %e, "Boomerang bookkeeping failed"),
                        }
                    }
                    Work::Dispatch(task) => {
                        let task_id = task.id;
                        match self.dispatcher.assign_or_queue(&task).await {
                            Ok(Submission::Assigned(assignment)) => {
                                work.push_back(Work::Deliver(assignment));
                            }
                            Ok(Submission::Queued(_)) => {}
                            Err(e) => {
                                if let Ok(task) = self.registry.fail_task(task_id, e.to_string()).await {
                                    work.push_back(Work::Settled(task));
                                }
                            }
                        }
                    }
                    Work::Deliver(assignment) => {
                        if let Err(e) = self.deliver(&assignment).await {
                            error!(task_id = %assignment.task_id, agent_id = %assignment.agent_id, error = %e, "Task delegation failed");
                            if let Ok(task) = self
                                .registry
                                .fail_task(assignment.task_id, e.to_string())
                                .await
                            {
                                work.push_back(Work::Settled(task));
                            }
                        }
                    }
                }
            }
            let assigned = self.dispatcher.process_queue().await;
            if assigned.is_empty() {
                break;
            }
            work.extend(assigned.into_iter().map(Work::Deliver));
        }
    }

    async fn deliver(&self, assignment: &AgentAssignment) -> SwarmResult<()> {
        let task = self.registry.get_task(assignment.task_id).await?;
        let message = Message::new(
            ORCHESTRATOR_ENDPOINT,
            assignment.agent_id,
            MessageKind::TaskDelegation,
            serde_json::to_value(&task)?,
        )
        .with_priority(message_priority(task.priority));
        self.bus.send(message).await
    }

    async fn notify_waiters(&self, task: &Task) {
        let waiting = self.waiters.lock().await.remove(&task.id);
        for waiter in waiting.into_iter().flatten() {
            let _ = waiter.send(task.clone());
        }
    }

    async fn persist(&self, task: &Task) {
        let Some(store) = &self.collaborators.task_store else {
            return;
        };
        match store.create_persisted_task(task).await {
            Ok(stored_id) => {
                self.persisted.lock().await.insert(task.id, stored_id);
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Task store unavailable"),
        }
    }

    async fn record_result(&self, task: &Task) {
        let Some(store) = &self.collaborators.task_store else {
            return;
        };
        let Some(stored_id) = self.persisted.lock().await.remove(&task.id) else {
            return;
        };
        let result = match &task.status {
            swarm_core::TaskStatus::Failed { reason } => serde_json::json!({"error": reason}),
            _ => task.result.clone().unwrap_or(serde_json::Value::Null),
        };
        if let Err(e) = store.record_execution_result(&stored_id, &result).await {
            warn!(task_id = %task.id, error = %e, "Failed to record task result");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for (_, handle) in self.workers.get_mut().drain() {
            handle.abort();
        }
        if let Some(handle) = self.control.get_mut().take() {
            handle.abort();
        }
    }
}

fn message_priority(task_priority: i32) -> MessagePriority {
    match task_priority {
        p if p >= 8 => MessagePriority::Critical,
        p if p >= 4 => MessagePriority::High,
        p if p >= 0 => MessagePriority::Normal,
        _ => MessagePriority::Low,
    }
}

async fn control_loop(orchestrator: Weak<Orchestrator>, mut mailbox: Mailbox) {
    while let Some(message) = mailbox.recv().await {
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        match message.kind {
            MessageKind::CompletionReport => {
                match serde_json::from_value::<CompletionReport>(message.payload) {
                    Ok(report) => orchestrator.handle_report(report).await,
                    Err(e) => error!(from = %message.sender, error = %e, "Malformed completion report"),
                }
            }
            other => debug!(kind = ?other, from = %message.sender, "Orchestrator ignoring message"),
        }
    }
    debug!("Orchestrator control loop stopped");
}
