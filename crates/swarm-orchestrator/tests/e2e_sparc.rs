//! End-to-end SPARC workflow tests.
//!
//! Runs whole workflows through the orchestrator with scripted executors and
//! checks phase order, skipping, the refinement loop bound, cancellation, and
//! that finished workflows cannot be touched again.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{
    Agent, AgentType, PhaseStatus, SparcPhase, SwarmError, SwarmResult, Task, WorkflowStatus,
};
use swarm_orchestrator::*;

// ---------------------------------------------------------------------------
// Scripted executors
// ---------------------------------------------------------------------------

/// Reviewer that asks for revisions on every pass.
struct NeverSatisfied {
    reviews: AtomicU32,
}

#[async_trait]
impl AgentExecutor for NeverSatisfied {
    async fn execute(&self, _agent: &Agent, task: &Task) -> SwarmResult<ExecutionOutcome> {
        let n = self.reviews.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExecutionOutcome::Completed(serde_json::json!({
            "review": n,
            "task": task.description,
            "revisions_requested": true,
        })))
    }
}

/// Reviewer that is satisfied on the given pass.
struct SatisfiedOn {
    pass: u32,
    reviews: AtomicU32,
}

#[async_trait]
impl AgentExecutor for SatisfiedOn {
    async fn execute(&self, _agent: &Agent, _task: &Task) -> SwarmResult<ExecutionOutcome> {
        let n = self.reviews.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExecutionOutcome::Completed(serde_json::json!({
            "review": n,
            "revisions_requested": n < self.pass,
        })))
    }
}

/// Implementation agent that splits its work in two the first time.
struct SplittingImplementer;

#[async_trait]
impl AgentExecutor for SplittingImplementer {
    async fn execute(&self, _agent: &Agent, task: &Task) -> SwarmResult<ExecutionOutcome> {
        if task.parent.is_none() {
            return Ok(ExecutionOutcome::Decompose(vec![
                SubtaskSpec::new("write the storage layer"),
                SubtaskSpec::new("write the sync layer"),
            ]));
        }
        Ok(ExecutionOutcome::Completed(serde_json::json!(task.description)))
    }
}

struct Sleepy;

#[async_trait]
impl AgentExecutor for Sleepy {
    async fn execute(&self, _agent: &Agent, task: &Task) -> SwarmResult<ExecutionOutcome> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ExecutionOutcome::Completed(serde_json::json!(task.description)))
    }
}

async fn sparc_engine(sparc: SparcConfig, executors: Option<ExecutorTable>) -> SparcEngine {
    let config = SwarmConfig {
        sparc,
        ..SwarmConfig::default()
    };
    let orchestrator = Orchestrator::start_with(config, executors, Collaborators::default())
        .await
        .unwrap();
    SparcEngine::new(orchestrator)
}

// ---------------------------------------------------------------------------
// 1. Default scenario: every phase, in order, one compiled entry each
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_workflow_runs_all_phases_in_order() {
    let engine = sparc_engine(SparcConfig::default(), None).await;
    let id = engine
        .create_workflow("Design a local-first task management system")
        .await
        .unwrap();
    assert_eq!(engine.status(id).await.unwrap().status, WorkflowStatus::Created);

    let view = engine.start(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Completed);
    assert_eq!(view.max_iterations, 3);

    let report = engine.report(id).await.unwrap();
    assert_eq!(report.phase_sequence, SparcPhase::ALL.to_vec());
    assert_eq!(report.results.len(), 5);
    let phases: Vec<SparcPhase> = report.results.iter().map(|r| r.phase).collect();
    assert_eq!(phases, SparcPhase::ALL.to_vec());
    for result in &report.results {
        assert_eq!(result.agent_type, result.phase.agent_type());
        assert!(result.agent_id.is_some());
    }
    assert_eq!(report.iterations, 1);
    assert!(view.phases.iter().all(|(_, s)| *s == PhaseStatus::Completed));
}

// ---------------------------------------------------------------------------
// 2. Optional phases disabled: two transitions, the rest skipped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn minimal_workflow_has_two_transitions() {
    let sparc = SparcConfig {
        enable_pseudocode: false,
        enable_architecture: false,
        enable_refinement: false,
        ..SparcConfig::default()
    };
    let engine = sparc_engine(sparc, None).await;
    let report = engine.run_workflow("Write a changelog generator").await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(
        report.phase_sequence,
        vec![SparcPhase::Specification, SparcPhase::Completion]
    );
    assert_eq!(report.results.len(), 2);

    let wf = engine.get_workflow(report.workflow_id).await.unwrap();
    for phase in [SparcPhase::Pseudocode, SparcPhase::Architecture, SparcPhase::Refinement] {
        assert_eq!(wf.phase_status(phase), Some(PhaseStatus::Skipped));
    }
}

// ---------------------------------------------------------------------------
// 3. Refinement that never converges fails after max_iterations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn endless_revisions_fail_the_workflow() {
    let reviewer = Arc::new(NeverSatisfied {
        reviews: AtomicU32::new(0),
    });
    let executors = ExecutorTable::default().with_handler(AgentType::Review, reviewer.clone());
    let engine = sparc_engine(SparcConfig::default(), Some(executors)).await;

    let err = engine.run_workflow("Polish forever").await.unwrap_err();
    let failure = err.workflow_failure().expect("workflow failure");
    assert_eq!(failure.failed_phase, SparcPhase::Refinement);
    assert_eq!(failure.furthest_completed(), Some(SparcPhase::Architecture));
    assert_eq!(failure.partial_results.len(), 3);
    assert!(failure.reason.contains("3 iterations"));
    assert_eq!(reviewer.reviews.load(Ordering::SeqCst), 3);

    let view = engine.status(failure.workflow_id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);
    assert_eq!(view.iteration, 3);
}

#[tokio::test]
async fn start_reports_failure_in_the_view() {
    let executors = ExecutorTable::default().with_handler(
        AgentType::Review,
        Arc::new(NeverSatisfied {
            reviews: AtomicU32::new(0),
        }),
    );
    let engine = sparc_engine(SparcConfig::default(), Some(executors)).await;
    let id = engine.create_workflow("Polish forever").await.unwrap();

    let view = engine.start(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);
    assert!(view.failure_reason.unwrap().contains("3 iterations"));

    let failure = match engine.report(id).await {
        Err(SwarmError::WorkflowFailed(failure)) => failure,
        other => panic!("expected a workflow failure, got {:?}", other.map(|r| r.status)),
    };
    assert_eq!(failure.failed_phase, SparcPhase::Refinement);
    assert_eq!(failure.partial_results.len(), 3);
}

#[tokio::test]
async fn refinement_stops_when_review_is_satisfied() {
    let reviewer = Arc::new(SatisfiedOn {
        pass: 2,
        reviews: AtomicU32::new(0),
    });
    let executors = ExecutorTable::default().with_handler(AgentType::Review, reviewer.clone());
    let engine = sparc_engine(SparcConfig::default(), Some(executors)).await;

    let report = engine.run_workflow("Polish twice").await.unwrap();
    let refinement = report
        .results
        .iter()
        .find(|r| r.phase == SparcPhase::Refinement)
        .unwrap();
    assert_eq!(refinement.output["iterations"], 2);
    assert_eq!(refinement.output["reviews"].as_array().unwrap().len(), 2);
    assert_eq!(refinement.output["implementations"].as_array().unwrap().len(), 1);
    assert_eq!(report.iterations, 2);
}

// ---------------------------------------------------------------------------
// 4. Terminal workflows reject every mutation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_workflow_is_immutable() {
    let engine = sparc_engine(SparcConfig::default(), None).await;
    let report = engine.run_workflow("Small tool").await.unwrap();
    let id = report.workflow_id;
    let before = engine.get_workflow(id).await.unwrap();

    assert!(matches!(engine.advance_phase(id).await, Err(SwarmError::WorkflowTerminal(_))));
    assert!(matches!(engine.start(id).await, Err(SwarmError::WorkflowTerminal(_))));
    assert!(matches!(engine.cancel_workflow(id).await, Err(SwarmError::WorkflowTerminal(_))));

    let after = engine.get_workflow(id).await.unwrap();
    assert_eq!(after.status, WorkflowStatus::Completed);
    assert_eq!(after.results, before.results);
    assert_eq!(after.updated_at, before.updated_at);
}

// ---------------------------------------------------------------------------
// 5. Manual advancement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_mode_advances_one_phase_per_call() {
    let sparc = SparcConfig {
        auto_advance: false,
        ..SparcConfig::default()
    };
    let engine = sparc_engine(sparc, None).await;
    let id = engine.create_workflow("Step by step").await.unwrap();

    assert!(matches!(
        engine.advance_phase(id).await,
        Err(SwarmError::IllegalTransition(_))
    ));
    engine.start(id).await.unwrap();

    for (n, phase) in SparcPhase::ALL.into_iter().enumerate() {
        let view = engine.advance_phase(id).await.unwrap();
        assert_eq!(view.completed_phases, n + 1, "after {phase}");
        let expected = if phase == SparcPhase::Completion {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Running
        };
        assert_eq!(view.status, expected);
    }
    assert!(matches!(engine.advance_phase(id).await, Err(SwarmError::WorkflowTerminal(_))));
}

// ---------------------------------------------------------------------------
// 6. Boomerang inside a phase and cancellation of a running workflow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_phase_can_decompose() {
    let sparc = SparcConfig {
        enable_refinement: false,
        ..SparcConfig::default()
    };
    let executors =
        ExecutorTable::default().with_handler(AgentType::Implementation, Arc::new(SplittingImplementer));
    let engine = sparc_engine(sparc, Some(executors)).await;
    let report = engine.run_workflow("Split the build").await.unwrap();

    let completion = report.results.last().unwrap();
    assert_eq!(completion.phase, SparcPhase::Completion);
    assert_eq!(
        completion.output,
        serde_json::json!(["write the storage layer", "write the sync layer"])
    );
}

#[tokio::test]
async fn cancelling_a_running_workflow_frees_its_agents() {
    let executors = ExecutorTable::default().with_handler(AgentType::Research, Arc::new(Sleepy));
    let engine = Arc::new(sparc_engine(SparcConfig::default(), Some(executors)).await);
    let id = engine.create_workflow("Cancel me").await.unwrap();

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.start(id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let view = engine.cancel_workflow(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);
    assert_eq!(view.failure_reason.as_deref(), Some("cancelled"));

    let final_view = run.await.unwrap().unwrap();
    assert_eq!(final_view.status, WorkflowStatus::Failed);

    let wf = engine.get_workflow(id).await.unwrap();
    let failure = wf.failure.unwrap();
    assert_eq!(failure.failed_phase, SparcPhase::Specification);
    assert!(failure.partial_results.is_empty());
}

// ---------------------------------------------------------------------------
// 7. Workflows run side by side on a multi-threaded runtime
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workflows_run_concurrently_on_spawned_tasks() {
    let engine = Arc::new(sparc_engine(SparcConfig::default(), None).await);

    let mut runs = Vec::new();
    for i in 0..3 {
        let engine = engine.clone();
        runs.push(tokio::spawn(async move {
            engine.run_workflow(&format!("Concurrent build {i}")).await
        }));
    }
    let mut starts = Vec::new();
    for i in 0..2 {
        let id = engine.create_workflow(&format!("Started build {i}")).await.unwrap();
        let engine = engine.clone();
        starts.push(tokio::spawn(async move { engine.start(id).await }));
    }

    for run in runs {
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.phase_sequence, SparcPhase::ALL.to_vec());
    }
    for start in starts {
        let view = start.await.unwrap().unwrap();
        assert_eq!(view.status, WorkflowStatus::Completed);
    }

    assert_eq!(engine.list_workflows().await.len(), 5);
    let stats = engine.orchestrator().stats().await;
    assert_eq!(stats.busy_agents, 0);
    assert_eq!(stats.queued_tasks, 0);
}
