//! The SPARC workflow engine.
//!
//! A workflow walks Specification, Pseudocode, Architecture, Refinement and
//! Completion in that order. Each phase becomes a task for the phase's agent
//! type, carrying everything earlier phases produced. Refinement loops review
//! and implementation until the reviewer stops asking for revisions or the
//! iteration cap is reached.

use crate::config::SparcConfig;
use crate::engine::Orchestrator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use swarm_core::{
    AgentId, AgentType, Message, MessageKind, PhaseResult, PhaseStatus, SparcPhase, SwarmError,
    SwarmResult, Task, TaskId, TaskStatus, WorkflowFailure, WorkflowId, WorkflowStatus,
    ORCHESTRATOR_ENDPOINT,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-phase bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: SparcPhase,
    pub status: PhaseStatus,
    pub agent_type: AgentType,
    /// Dispatches made for this phase, retries included.
    pub attempts: u32,
    pub tasks: Vec<TaskId>,
    pub error: Option<String>,
}

/// One SPARC workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparcWorkflow {
    pub id: WorkflowId,
    pub request: String,
    pub status: WorkflowStatus,
    pub phases: Vec<PhaseState>,
    pub current_phase: Option<SparcPhase>,
    /// Refinement iterations run so far.
    pub iteration: u32,
    pub max_iterations: u32,
    pub auto_advance: bool,
    /// Compiled result: one entry per completed phase, in order.
    pub results: Vec<PhaseResult>,
    /// Phases in the order they were entered. Manual retries appear again.
    pub history: Vec<SparcPhase>,
    pub team_id: Option<Uuid>,
    pub failure: Option<WorkflowFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    advancing: bool,
}

impl SparcWorkflow {
    fn new(request: String, config: &SparcConfig, auto_advance: bool) -> Self {
        let phases = SparcPhase::ALL
            .into_iter()
            .map(|phase| PhaseState {
                phase,
                status: if phase_enabled(config, phase) {
                    PhaseStatus::Pending
                } else {
                    PhaseStatus::Skipped
                },
                agent_type: phase.agent_type(),
                attempts: 0,
                tasks: Vec::new(),
                error: None,
            })
            .collect();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            status: WorkflowStatus::Created,
            phases,
            current_phase: None,
            iteration: 0,
            max_iterations: config.max_iterations,
            auto_advance,
            results: Vec::new(),
            history: Vec::new(),
            team_id: None,
            failure: None,
            created_at: now,
            updated_at: now,
            advancing: false,
        }
    }

    /// Next phase to run: the first one still pending, or a halted one.
    fn next_phase(&self) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| matches!(p.status, PhaseStatus::Pending | PhaseStatus::Failed))
    }

    pub fn phase_status(&self, phase: SparcPhase) -> Option<PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| p.status)
    }

    /// Running with a failed phase waiting for a manual retry.
    pub fn is_halted(&self) -> bool {
        self.status == WorkflowStatus::Running
            && self.phases.iter().any(|p| p.status == PhaseStatus::Failed)
    }

    fn accumulated_input(&self) -> SwarmResult<serde_json::Value> {
        Ok(serde_json::json!({
            "request": self.request,
            "phases": serde_json::to_value(&self.results)?,
        }))
    }

    fn fail(&mut self, phase: SparcPhase, reason: String) {
        self.status = WorkflowStatus::Failed;
        self.failure = Some(WorkflowFailure {
            workflow_id: self.id,
            failed_phase: phase,
            reason,
            partial_results: self.results.clone(),
        });
        self.updated_at = Utc::now();
    }

    fn view(&self) -> WorkflowStatusView {
        WorkflowStatusView {
            id: self.id,
            request: self.request.clone(),
            status: self.status,
            current_phase: self.current_phase,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            halted: self.is_halted(),
            phases: self
                .phases
                .iter()
                .map(|p| (p.phase, p.status))
                .collect(),
            completed_phases: self.results.len(),
            failure_reason: self.failure.as_ref().map(|f| f.reason.clone()),
        }
    }
}

/// Snapshot of a workflow's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub id: WorkflowId,
    pub request: String,
    pub status: WorkflowStatus,
    pub current_phase: Option<SparcPhase>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub halted: bool,
    pub phases: Vec<(SparcPhase, PhaseStatus)>,
    pub completed_phases: usize,
    pub failure_reason: Option<String>,
}

/// Result of a completed workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub request: String,
    pub status: WorkflowStatus,
    pub results: Vec<PhaseResult>,
    pub phase_sequence: Vec<SparcPhase>,
    pub iterations: u32,
}

/// How a phase attempt went wrong.
enum PhaseError {
    /// Dispatch failed or timed out; a manual workflow halts here.
    Dispatch(SwarmError),
    /// Cannot be retried.
    Fatal(String),
}

impl PhaseError {
    fn reason(&self) -> String {
        match self {
            PhaseError::Dispatch(e) => e.to_string(),
            PhaseError::Fatal(reason) => reason.clone(),
        }
    }
}

type PhaseOutput = (serde_json::Value, Option<AgentId>);

/// Drives SPARC workflows on top of an [`Orchestrator`].
pub struct SparcEngine {
    orchestrator: Arc<Orchestrator>,
    config: SparcConfig,
    workflows: RwLock<HashMap<WorkflowId, SparcWorkflow>>,
}

impl SparcEngine {
    /// Use the orchestrator's SPARC settings.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let config = orchestrator.config().sparc.clone();
        Self {
            orchestrator,
            config,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_config(orchestrator: Arc<Orchestrator>, config: SparcConfig) -> SwarmResult<Self> {
        config.validate()?;
        Ok(Self {
            orchestrator,
            config,
            workflows: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SparcConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Create a workflow in the `created` state and form its team.
    pub async fn create_workflow(&self, request: &str) -> SwarmResult<WorkflowId> {
        self.create(request, self.config.auto_advance).await
    }

    async fn create(&self, request: &str, auto_advance: bool) -> SwarmResult<WorkflowId> {
        let request = request.trim();
        if request.is_empty() {
            return Err(SwarmError::InvalidConfig(
                "workflow request must not be empty".to_string(),
            ));
        }
        let mut workflow = SparcWorkflow::new(request.to_string(), &self.config, auto_advance);

        let mut composition: Vec<AgentType> = workflow
            .phases
            .iter()
            .filter(|p| p.status != PhaseStatus::Skipped)
            .map(|p| p.agent_type)
            .collect();
        if self.config.enable_refinement {
            composition.push(AgentType::Implementation);
        }
        let team = self
            .orchestrator
            .teams()
            .form_team(
                self.orchestrator.registry(),
                format!("sparc-{}", workflow.id),
                &composition,
                Some(workflow.id),
            )
            .await;
        workflow.team_id = Some(team.id);

        let id = workflow.id;
        for skipped in workflow.phases.iter().filter(|p| p.status == PhaseStatus::Skipped) {
            debug!(workflow_id = %id, phase = %skipped.phase, "Phase disabled; skipping");
        }
        self.workflows.write().await.insert(id, workflow);
        info!(workflow_id = %id, request = %request, auto_advance, "SPARC workflow created");
        Ok(id)
    }

    /// Move a created workflow to `running`. With auto-advance on, every
    /// phase then runs before this returns.
    ///
    /// A workflow that fails while running still comes back as `Ok` with
    /// status `Failed`; the error is only for calls that cannot start it.
    /// [`SparcEngine::report`] turns the failure into a typed
    /// `WorkflowFailed` with the partial results.
    pub async fn start(&self, id: WorkflowId) -> SwarmResult<WorkflowStatusView> {
        let auto = {
            let mut workflows = self.workflows.write().await;
            let wf = workflows.get_mut(&id).ok_or(SwarmError::WorkflowNotFound(id))?;
            if wf.status.is_terminal() {
                return Err(SwarmError::WorkflowTerminal(id));
            }
            if wf.status != WorkflowStatus::Created {
                return Err(SwarmError::IllegalTransition(format!(
                    "workflow {id} already started"
                )));
            }
            wf.status = WorkflowStatus::Running;
            wf.updated_at = Utc::now();
            wf.auto_advance
        };
        info!(workflow_id = %id, "SPARC workflow started");

        let mut view = self.status(id).await?;
        if auto {
            while view.status == WorkflowStatus::Running {
                view = self.step(id).await?;
            }
        }
        Ok(view)
    }

    /// Run the next pending phase, or retry a halted one.
    pub async fn advance_phase(&self, id: WorkflowId) -> SwarmResult<WorkflowStatusView> {
        self.step(id).await
    }

    /// Create, start and run a workflow to the end.
    ///
    /// Runs with auto-advance regardless of configuration. A failed workflow
    /// comes back as `WorkflowFailed` carrying the phases that completed.
    pub async fn run_workflow(&self, request: &str) -> SwarmResult<WorkflowReport> {
        let id = self.create(request, true).await?;
        self.start(id).await?;
        self.report(id).await
    }

    /// Cancel a workflow: fail it and every task it still has in flight.
    pub async fn cancel_workflow(&self, id: WorkflowId) -> SwarmResult<WorkflowStatusView> {
        let (view, phase) = {
            let mut workflows = self.workflows.write().await;
            let wf = workflows.get_mut(&id).ok_or(SwarmError::WorkflowNotFound(id))?;
            if wf.status.is_terminal() {
                return Err(SwarmError::WorkflowTerminal(id));
            }
            let idx = wf
                .phases
                .iter()
                .position(|p| p.status == PhaseStatus::InProgress)
                .or_else(|| wf.next_phase());
            let phase = match idx {
                Some(i) => {
                    wf.phases[i].status = PhaseStatus::Failed;
                    wf.phases[i].error = Some("cancelled".to_string());
                    wf.phases[i].phase
                }
                None => SparcPhase::Completion,
            };
            wf.fail(phase, "cancelled".to_string());
            (wf.view(), phase)
        };
        let cancelled = self.orchestrator.cancel_workflow_tasks(id).await;
        info!(workflow_id = %id, cancelled_tasks = cancelled.len(), "SPARC workflow cancelled");
        self.after_transition(id, phase, &view, "workflow cancelled").await;
        Ok(view)
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> SwarmResult<SparcWorkflow> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SwarmError::WorkflowNotFound(id))
    }

    pub async fn status(&self, id: WorkflowId) -> SwarmResult<WorkflowStatusView> {
        self.workflows
            .read()
            .await
            .get(&id)
            .map(SparcWorkflow::view)
            .ok_or(SwarmError::WorkflowNotFound(id))
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowStatusView> {
        let workflows = self.workflows.read().await;
        let mut views: Vec<(DateTime<Utc>, WorkflowStatusView)> = workflows
            .values()
            .map(|wf| (wf.created_at, wf.view()))
            .collect();
        views.sort_by_key(|(created, _)| *created);
        views.into_iter().map(|(_, v)| v).collect()
    }

    /// Final report of a completed workflow, or its failure.
    pub async fn report(&self, id: WorkflowId) -> SwarmResult<WorkflowReport> {
        let wf = self.get_workflow(id).await?;
        match wf.status {
            WorkflowStatus::Completed => Ok(WorkflowReport {
                workflow_id: wf.id,
                request: wf.request,
                status: wf.status,
                results: wf.results,
                phase_sequence: wf.history,
                iterations: wf.iteration,
            }),
            WorkflowStatus::Failed => {
                let failure = wf.failure.unwrap_or_else(|| WorkflowFailure {
                    workflow_id: id,
                    failed_phase: SparcPhase::Specification,
                    reason: "unknown".to_string(),
                    partial_results: Vec::new(),
                });
                Err(SwarmError::WorkflowFailed(Box::new(failure)))
            }
            other => Err(SwarmError::IllegalTransition(format!(
                "workflow {id} is {other}, not finished"
            ))),
        }
    }

    // --- Phase execution ---

    async fn step(&self, id: WorkflowId) -> SwarmResult<WorkflowStatusView> {
        let (idx, phase, input, auto) = {
            let mut workflows = self.workflows.write().await;
            let wf = workflows.get_mut(&id).ok_or(SwarmError::WorkflowNotFound(id))?;
            match wf.status {
                WorkflowStatus::Completed | WorkflowStatus::Failed => {
                    return Err(SwarmError::WorkflowTerminal(id))
                }
                WorkflowStatus::Created => {
                    return Err(SwarmError::IllegalTransition(format!(
                        "workflow {id} has not been started"
                    )))
                }
                WorkflowStatus::Running => {}
            }
            if wf.advancing {
                return Err(SwarmError::IllegalTransition(format!(
                    "workflow {id} is already advancing"
                )));
            }
            let Some(idx) = wf.next_phase() else {
                wf.status = WorkflowStatus::Completed;
                wf.current_phase = None;
                return Ok(wf.view());
            };
            let phase = wf.phases[idx].phase;
            wf.advancing = true;
            wf.phases[idx].status = PhaseStatus::InProgress;
            wf.phases[idx].error = None;
            wf.current_phase = Some(phase);
            wf.history.push(phase);
            wf.updated_at = Utc::now();
            (idx, phase, wf.accumulated_input(), wf.auto_advance)
        };
        let input = match input {
            Ok(input) => input,
            Err(e) => {
                self.finish_step(id, idx, Err(PhaseError::Fatal(e.to_string())), auto)
                    .await;
                return self.status(id).await;
            }
        };

        info!(workflow_id = %id, phase = %phase, "Entering phase");
        self.broadcast_status(id, phase, PhaseStatus::InProgress).await;

        let attempts = if auto { 2 } else { 1 };
        let outcome = if phase == SparcPhase::Refinement {
            self.run_refinement(id, idx, input, attempts).await
        } else {
            let description = phase_description(phase, &self.request_of(id).await);
            self.dispatch(id, idx, phase.agent_type(), description, input, attempts)
                .await
                .map_err(PhaseError::Dispatch)
        };
        Ok(self.finish_step(id, idx, outcome, auto).await)
    }

    /// Review then implement until the review asks for no more revisions.
    async fn run_refinement(
        &self,
        id: WorkflowId,
        idx: usize,
        input: serde_json::Value,
        attempts: u32,
    ) -> Result<PhaseOutput, PhaseError> {
        let request = self.request_of(id).await;
        let max = self.config.max_iterations;
        let mut reviews = Vec::new();
        let mut implementations = Vec::new();

        for iteration in 1..=max {
            {
                let mut workflows = self.workflows.write().await;
                match workflows.get_mut(&id) {
                    Some(wf) if !wf.status.is_terminal() => wf.iteration = iteration,
                    _ => {
                        return Err(PhaseError::Dispatch(SwarmError::Cancelled(format!(
                            "workflow {id} was cancelled"
                        ))))
                    }
                }
            }
            let mut review_input = input.clone();
            review_input["iteration"] = iteration.into();
            review_input["implementations"] = serde_json::Value::Array(implementations.clone());
            let (review, reviewer) = self
                .dispatch(
                    id,
                    idx,
                    AgentType::Review,
                    format!("Review iteration {iteration} for \"{request}\""),
                    review_input,
                    attempts,
                )
                .await
                .map_err(PhaseError::Dispatch)?;
            let revise = revisions_requested(&review);
            debug!(workflow_id = %id, iteration, revise, "Refinement review finished");
            reviews.push(review.clone());
            if !revise {
                let output = serde_json::json!({
                    "iterations": iteration,
                    "reviews": reviews,
                    "implementations": implementations,
                });
                return Ok((output, reviewer));
            }

            let mut fix_input = input.clone();
            fix_input["iteration"] = iteration.into();
            fix_input["review"] = review;
            let (implementation, _) = self
                .dispatch(
                    id,
                    idx,
                    AgentType::Implementation,
                    format!("Apply review feedback (iteration {iteration}) for \"{request}\""),
                    fix_input,
                    attempts,
                )
                .await
                .map_err(PhaseError::Dispatch)?;
            implementations.push(implementation);
        }
        warn!(workflow_id = %id, max_iterations = max, "Refinement did not converge");
        Err(PhaseError::Fatal(format!(
            "refinement still requested revisions after {max} iterations"
        )))
    }

    /// Submit one task for the phase and wait for it, up to `attempts` times.
    async fn dispatch(
        &self,
        id: WorkflowId,
        idx: usize,
        agent_type: AgentType,
        description: String,
        input: serde_json::Value,
        attempts: u32,
    ) -> SwarmResult<PhaseOutput> {
        let mut last_error = None;
        for attempt in 1..=attempts {
            if self.is_terminal(id).await {
                return Err(SwarmError::Cancelled(format!("workflow {id} was cancelled")));
            }
            match self
                .dispatch_once(id, idx, agent_type, description.clone(), input.clone())
                .await
            {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(workflow_id = %id, agent_type = %agent_type, attempt, error = %e, "Phase dispatch failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SwarmError::IllegalTransition("phase dispatched zero times".to_string())
        }))
    }

    async fn dispatch_once(
        &self,
        id: WorkflowId,
        idx: usize,
        agent_type: AgentType,
        description: String,
        input: serde_json::Value,
    ) -> SwarmResult<PhaseOutput> {
        let task = Task::new(agent_type, description)
            .with_priority(self.config.task_priority)
            .with_input(input)
            .with_workflow(id);
        let task_id = self.orchestrator.submit_task(task).await?;
        let phase = {
            let mut workflows = self.workflows.write().await;
            let wf = workflows.get_mut(&id).ok_or(SwarmError::WorkflowNotFound(id))?;
            if wf.status.is_terminal() {
                None
            } else {
                wf.phases[idx].attempts += 1;
                wf.phases[idx].tasks.push(task_id);
                Some(wf.phases[idx].phase)
            }
        };
        let Some(phase) = phase else {
            // Cancelled between submit and bookkeeping.
            if let Err(e) = self.orchestrator.cancel_task(task_id).await {
                debug!(task_id = %task_id, error = %e, "Orphaned task already settled");
            }
            return Err(SwarmError::Cancelled(format!("workflow {id} was cancelled")));
        };

        match self
            .orchestrator
            .await_task(task_id, Some(self.config.phase_timeout()))
            .await
        {
            Ok(task) => match task.status {
                TaskStatus::Completed => Ok((
                    task.result.unwrap_or(serde_json::Value::Null),
                    task.assigned_agent,
                )),
                TaskStatus::Failed { reason } => Err(SwarmError::Execution(reason)),
                other => Err(SwarmError::IllegalTransition(format!(
                    "task {task_id} returned while {other}"
                ))),
            },
            Err(SwarmError::Timeout { .. }) => {
                // Frees the agent; whatever it is still doing is discarded.
                if let Err(e) = self.orchestrator.cancel_task(task_id).await {
                    debug!(task_id = %task_id, error = %e, "Timed-out task already settled");
                }
                Err(SwarmError::PhaseTimeout {
                    phase: phase.to_string(),
                    timeout_ms: self.config.phase_timeout_ms,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Record the outcome of a phase attempt and return the new view.
    async fn finish_step(
        &self,
        id: WorkflowId,
        idx: usize,
        outcome: Result<PhaseOutput, PhaseError>,
        auto: bool,
    ) -> WorkflowStatusView {
        let (view, phase, summary) = {
            let mut workflows = self.workflows.write().await;
            let Some(wf) = workflows.get_mut(&id) else {
                return WorkflowStatusView::missing(id);
            };
            wf.advancing = false;
            let phase = wf.phases[idx].phase;
            if wf.status.is_terminal() {
                // Cancelled while the phase was running.
                return wf.view();
            }
            wf.updated_at = Utc::now();
            let summary = match outcome {
                Ok((output, agent_id)) => {
                    wf.phases[idx].status = PhaseStatus::Completed;
                    wf.results.push(PhaseResult {
                        phase,
                        agent_type: wf.phases[idx].agent_type,
                        agent_id,
                        output,
                        completed_at: Utc::now(),
                    });
                    if wf.next_phase().is_none() {
                        wf.status = WorkflowStatus::Completed;
                        wf.current_phase = None;
                    }
                    format!("{phase} completed")
                }
                Err(PhaseError::Dispatch(e)) if !auto => {
                    wf.phases[idx].status = PhaseStatus::Failed;
                    wf.phases[idx].error = Some(e.to_string());
                    format!("{phase} halted: {e}")
                }
                Err(e) => {
                    let reason = e.reason();
                    wf.phases[idx].status = PhaseStatus::Failed;
                    wf.phases[idx].error = Some(reason.clone());
                    wf.fail(phase, reason.clone());
                    format!("{phase} failed: {reason}")
                }
            };
            (wf.view(), phase, summary)
        };

        match view.status {
            WorkflowStatus::Completed => info!(workflow_id = %id, "SPARC workflow completed"),
            WorkflowStatus::Failed => warn!(workflow_id = %id, phase = %phase, "SPARC workflow failed"),
            _ if view.halted => warn!(workflow_id = %id, phase = %phase, "SPARC workflow halted"),
            _ => {}
        }
        self.after_transition(id, phase, &view, &summary).await;
        view
    }

    /// Tell the team and the decision log; dissolve the team once terminal.
    async fn after_transition(
        &self,
        id: WorkflowId,
        phase: SparcPhase,
        view: &WorkflowStatusView,
        summary: &str,
    ) {
        let status = view
            .phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map_or(PhaseStatus::Failed, |(_, s)| *s);
        self.broadcast_status(id, phase, status).await;

        if let Some(log) = self.orchestrator.collaborators().decision_log.clone() {
            let summary = summary.to_string();
            tokio::spawn(async move {
                if let Err(e) = log.log_decision(id, phase, &summary).await {
                    warn!(workflow_id = %id, phase = %phase, error = %e, "Decision log unavailable");
                }
            });
        }

        if view.status.is_terminal() {
            self.orchestrator.teams().dissolve_for_workflow(id).await;
        }
    }

    async fn broadcast_status(&self, id: WorkflowId, phase: SparcPhase, status: PhaseStatus) {
        let Some(team) = self.orchestrator.teams().team_for_workflow(id).await else {
            return;
        };
        let message = Message::new(
            ORCHESTRATOR_ENDPOINT,
            ORCHESTRATOR_ENDPOINT,
            MessageKind::StatusUpdate,
            serde_json::json!({
                "workflow_id": id,
                "phase": phase,
                "status": status,
            }),
        );
        let delivered = self
            .orchestrator
            .bus()
            .broadcast(ORCHESTRATOR_ENDPOINT, &message, &team.members)
            .await;
        if delivered < team.members.len() {
            debug!(workflow_id = %id, delivered, members = team.members.len(), "Status update partially delivered");
        }
    }

    async fn request_of(&self, id: WorkflowId) -> String {
        self.workflows
            .read()
            .await
            .get(&id)
            .map(|wf| wf.request.clone())
            .unwrap_or_default()
    }

    async fn is_terminal(&self, id: WorkflowId) -> bool {
        self.workflows
            .read()
            .await
            .get(&id)
            .map_or(true, |wf| wf.status.is_terminal())
    }
}

impl WorkflowStatusView {
    fn missing(id: WorkflowId) -> Self {
        Self {
            id,
            request: String::new(),
            status: WorkflowStatus::Failed,
            current_phase: None,
            iteration: 0,
            max_iterations: 0,
            halted: false,
            phases: Vec::new(),
            completed_phases: 0,
            failure_reason: Some("workflow record missing".to_string()),
        }
    }
}

fn phase_enabled(config: &SparcConfig, phase: SparcPhase) -> bool {
    match phase {
        SparcPhase::Specification | SparcPhase::Completion => true,
        SparcPhase::Pseudocode => config.enable_pseudocode,
        SparcPhase::Architecture => config.enable_architecture,
        SparcPhase::Refinement => config.enable_refinement,
    }
}

fn phase_description(phase: SparcPhase, request: &str) -> String {
    format!("{phase} phase: {} for \"{request}\"", phase.objective())
}

/// A review asks for another round by setting `revisions_requested: true`.
fn revisions_requested(review: &serde_json::Value) -> bool {
    review
        .get("revisions_requested")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}
