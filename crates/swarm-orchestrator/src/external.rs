//! Narrow interfaces to the services the orchestration core calls out to.
//!
//! None of them is required: every slot in [`Collaborators`] is optional and
//! the core degrades gracefully when one is absent or failing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swarm_core::{SparcPhase, SwarmResult, Task, TaskId, WorkflowId};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistent task storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a task and return the store's id for it.
    async fn create_persisted_task(&self, task: &Task) -> SwarmResult<String>;

    async fn record_execution_result(
        &self,
        stored_id: &str,
        result: &serde_json::Value,
    ) -> SwarmResult<()>;
}

/// Limits handed to the sandbox for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub timeout_ms: u64,
    pub max_memory_mb: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_memory_mb: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Sandboxed code execution. Forced termination lives here, not in the core.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute_sandboxed(
        &self,
        language: &str,
        code: &str,
        limits: SandboxLimits,
    ) -> SwarmResult<SandboxOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Research/search aggregation used by research agents.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> SwarmResult<Vec<SearchHit>>;
}

/// Fire-and-forget sink for workflow decisions.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn log_decision(
        &self,
        workflow_id: WorkflowId,
        phase: SparcPhase,
        summary: &str,
    ) -> SwarmResult<()>;
}

/// Annotates tasks with the skills they need before dispatch.
#[async_trait]
pub trait SkillCorrelator: Send + Sync {
    async fn analyze_required_skills(&self, description: &str) -> SwarmResult<Vec<String>>;
}

/// The set of external services wired into an orchestrator.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub task_store: Option<Arc<dyn TaskStore>>,
    pub sandbox: Option<Arc<dyn CodeSandbox>>,
    pub search: Option<Arc<dyn SearchService>>,
    pub decision_log: Option<Arc<dyn DecisionLog>>,
    pub skills: Option<Arc<dyn SkillCorrelator>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_decision_log(mut self, log: Arc<dyn DecisionLog>) -> Self {
        self.decision_log = Some(log);
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillCorrelator>) -> Self {
        self.skills = Some(skills);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("task_store", &self.task_store.is_some())
            .field("sandbox", &self.sandbox.is_some())
            .field("search", &self.search.is_some())
            .field("decision_log", &self.decision_log.is_some())
            .field("skills", &self.skills.is_some())
            .finish()
    }
}

/// A task as held by [`InMemoryTaskStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTask {
    pub stored_id: String,
    pub task_id: TaskId,
    pub description: String,
    pub result: Option<serde_json::Value>,
    pub stored_at: DateTime<Utc>,
}

/// Volatile task store for tests and embedding.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<Vec<PersistedTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<PersistedTask> {
        self.records.read().await.clone()
    }

    pub async fn find_by_task(&self, task_id: TaskId) -> Option<PersistedTask> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.task_id == task_id)
            .cloned()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_persisted_task(&self, task: &Task) -> SwarmResult<String> {
        let stored_id = Uuid::new_v4().to_string();
        self.records.write().await.push(PersistedTask {
            stored_id: stored_id.clone(),
            task_id: task.id,
            description: task.description.clone(),
            result: None,
            stored_at: Utc::now(),
        });
        Ok(stored_id)
    }

    async fn record_execution_result(
        &self,
        stored_id: &str,
        result: &serde_json::Value,
    ) -> SwarmResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.stored_id == stored_id) {
            record.result = Some(result.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub workflow_id: WorkflowId,
    pub phase: SparcPhase,
    pub summary: String,
    pub logged_at: DateTime<Utc>,
}

/// Decision log that keeps entries in memory.
#[derive(Default)]
pub struct InMemoryDecisionLog {
    entries: RwLock<Vec<DecisionEntry>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DecisionEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, workflow_id: WorkflowId) -> Vec<DecisionEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DecisionLog for InMemoryDecisionLog {
    async fn log_decision(
        &self,
        workflow_id: WorkflowId,
        phase: SparcPhase,
        summary: &str,
    ) -> SwarmResult<()> {
        self.entries.write().await.push(DecisionEntry {
            workflow_id,
            phase,
            summary: summary.to_string(),
            logged_at: Utc::now(),
        });
        Ok(())
    }
}
