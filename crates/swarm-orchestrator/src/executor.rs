use crate::external::{CodeSandbox, Collaborators, SandboxLimits, SearchService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use swarm_core::{Agent, AgentType, SwarmError, SwarmResult, Task};
use tracing::{debug, warn};

/// One requested child of a boomerang decomposition.
///
/// Unset fields are inherited from the parent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    #[serde(default)]
    pub task_type: Option<AgentType>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

impl SubtaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: None,
            priority: None,
            input: None,
        }
    }

    pub fn of_type(mut self, task_type: AgentType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// What an agent produced for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(serde_json::Value),
    /// The task is too large; run these subtasks first.
    Decompose(Vec<SubtaskSpec>),
}

/// The work an agent does. Implementations decide what happens inside;
/// the core only sees the outcome.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, agent: &Agent, task: &Task) -> SwarmResult<ExecutionOutcome>;
}

/// Closed lookup from agent type to its executor.
#[derive(Clone)]
pub struct ExecutorTable {
    handlers: HashMap<AgentType, Arc<dyn AgentExecutor>>,
}

impl ExecutorTable {
    /// Built-in handlers for all seven agent types.
    pub fn builtin(collaborators: &Collaborators) -> Self {
        let handlers = AgentType::ALL
            .into_iter()
            .map(|agent_type| {
                let handler: Arc<dyn AgentExecutor> = Arc::new(BuiltinExecutor {
                    agent_type,
                    search: collaborators.search.clone(),
                    sandbox: collaborators.sandbox.clone(),
                });
                (agent_type, handler)
            })
            .collect();
        Self { handlers }
    }

    /// Use the same executor for every agent type.
    pub fn uniform(executor: Arc<dyn AgentExecutor>) -> Self {
        let handlers = AgentType::ALL
            .into_iter()
            .map(|agent_type| (agent_type, executor.clone()))
            .collect();
        Self { handlers }
    }

    /// Replace the handler for one agent type.
    pub fn with_handler(mut self, agent_type: AgentType, executor: Arc<dyn AgentExecutor>) -> Self {
        self.handlers.insert(agent_type, executor);
        self
    }

    pub fn resolve(&self, agent_type: AgentType) -> SwarmResult<Arc<dyn AgentExecutor>> {
        self.handlers
            .get(&agent_type)
            .cloned()
            .ok_or_else(|| SwarmError::Execution(format!("no executor registered for {agent_type}")))
    }
}

impl Default for ExecutorTable {
    fn default() -> Self {
        Self::builtin(&Collaborators::default())
    }
}

/// Deterministic stand-in for real agent work: a type-specific summary of
/// the task, enriched by the search and sandbox services where relevant.
struct BuiltinExecutor {
    agent_type: AgentType,
    search: Option<Arc<dyn SearchService>>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
}

impl BuiltinExecutor {
    async fn research_sources(&self, task: &Task) -> Option<serde_json::Value> {
        let search = self.search.as_ref()?;
        match search.search(&task.description, 5).await {
            Ok(hits) => serde_json::to_value(hits).ok(),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Search service failed; continuing without sources");
                None
            }
        }
    }

    async fn run_code(&self, agent: &Agent, task: &Task) -> SwarmResult<Option<serde_json::Value>> {
        let (Some(sandbox), Some(input)) = (self.sandbox.as_ref(), task.input.as_ref()) else {
            return Ok(None);
        };
        let Some(code) = input.get("code").and_then(|c| c.as_str()) else {
            return Ok(None);
        };
        let language = input
            .get("language")
            .and_then(|l| l.as_str())
            .unwrap_or("rust");
        let defaults = SandboxLimits::default();
        let limits = SandboxLimits {
            timeout_ms: agent.resource_limits.task_timeout_ms.unwrap_or(defaults.timeout_ms),
            max_memory_mb: agent.resource_limits.max_memory_mb.unwrap_or(defaults.max_memory_mb),
        };
        debug!(task_id = %task.id, language, "Running code in sandbox");
        let output = sandbox.execute_sandboxed(language, code, limits).await?;
        if output.exit_code != 0 {
            return Err(SwarmError::Execution(format!(
                "sandboxed {language} exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(Some(serde_json::to_value(output)?))
    }
}

#[async_trait]
impl AgentExecutor for BuiltinExecutor {
    async fn execute(&self, agent: &Agent, task: &Task) -> SwarmResult<ExecutionOutcome> {
        let prior_phases = task
            .input
            .as_ref()
            .and_then(|i| i.get("phases"))
            .and_then(|p| p.as_array())
            .map_or(0, Vec::len);

        let mut output = serde_json::json!({
            "agent": agent.name,
            "agent_type": self.agent_type,
            "task": task.description,
            "summary": format!("{}: {}", self.agent_type.label(), self.agent_type.description()),
            "capabilities_used": agent.capabilities,
            "inputs_considered": prior_phases,
        });

        match self.agent_type {
            AgentType::Research => {
                if let Some(sources) = self.research_sources(task).await {
                    output["sources"] = sources;
                }
            }
            AgentType::Implementation => {
                if let Some(execution) = self.run_code(agent, task).await? {
                    output["execution"] = execution;
                }
            }
            AgentType::Review => {
                output["revisions_requested"] = serde_json::Value::Bool(false);
            }
            _ => {}
        }
        Ok(ExecutionOutcome::Completed(output))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::external::{SandboxOutput, SearchHit};
    use swarm_core::ResourceLimits;

    struct FixedSearch;

    #[async_trait]
    impl SearchService for FixedSearch {
        async fn search(&self, query: &str, limit: usize) -> SwarmResult<Vec<SearchHit>> {
            assert_eq!(limit, 5);
            Ok(vec![SearchHit {
                title: format!("About {query}"),
                url: "https://example.org/a".into(),
                snippet: "local-first sync".into(),
            }])
        }
    }

    struct EchoSandbox {
        exit_code: i32,
    }

    #[async_trait]
    impl CodeSandbox for EchoSandbox {
        async fn execute_sandboxed(
            &self,
            language: &str,
            code: &str,
            limits: SandboxLimits,
        ) -> SwarmResult<SandboxOutput> {
            Ok(SandboxOutput {
                stdout: format!("{language}:{code}:{}", limits.timeout_ms),
                stderr: if self.exit_code == 0 { String::new() } else { "boom\n".into() },
                exit_code: self.exit_code,
            })
        }
    }

    fn agent(agent_type: AgentType) -> Agent {
        Agent::new(agent_type, 1, Vec::new(), ResourceLimits::default())
    }

    fn completed(outcome: ExecutionOutcome) -> serde_json::Value {
        match outcome {
            ExecutionOutcome::Completed(v) => v,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_builtin_covers_every_type() {
        let table = ExecutorTable::default();
        for agent_type in AgentType::ALL {
            let executor = table.resolve(agent_type).unwrap();
            let task = Task::new(agent_type, "do the thing");
            let out = completed(executor.execute(&agent(agent_type), &task).await.unwrap());
            assert_eq!(out["agent_type"], serde_json::json!(agent_type));
            assert_eq!(out["task"], "do the thing");
        }
    }

    #[tokio::test]
    async fn test_review_never_requests_revisions() {
        let table = ExecutorTable::default();
        let task = Task::new(AgentType::Review, "review");
        let out = completed(
            table
                .resolve(AgentType::Review)
                .unwrap()
                .execute(&agent(AgentType::Review), &task)
                .await
                .unwrap(),
        );
        assert_eq!(out["revisions_requested"], false);
    }

    #[tokio::test]
    async fn test_research_uses_search() {
        let table = ExecutorTable::builtin(&Collaborators::new().with_search(Arc::new(FixedSearch)));
        let task = Task::new(AgentType::Research, "sync engines");
        let out = completed(
            table
                .resolve(AgentType::Research)
                .unwrap()
                .execute(&agent(AgentType::Research), &task)
                .await
                .unwrap(),
        );
        assert_eq!(out["sources"][0]["title"], "About sync engines");
    }

    #[tokio::test]
    async fn test_implementation_runs_code_in_sandbox() {
        let table = ExecutorTable::builtin(
            &Collaborators::new().with_sandbox(Arc::new(EchoSandbox { exit_code: 0 })),
        );
        let task = Task::new(AgentType::Implementation, "run it")
            .with_input(serde_json::json!({"code": "print(1)", "language": "python"}));
        let mut impl_agent = agent(AgentType::Implementation);
        impl_agent.resource_limits.task_timeout_ms = Some(500);
        let out = completed(
            table
                .resolve(AgentType::Implementation)
                .unwrap()
                .execute(&impl_agent, &task)
                .await
                .unwrap(),
        );
        assert_eq!(out["execution"]["stdout"], "python:print(1):500");
    }

    #[tokio::test]
    async fn test_sandbox_failure_fails_task() {
        let table = ExecutorTable::builtin(
            &Collaborators::new().with_sandbox(Arc::new(EchoSandbox { exit_code: 2 })),
        );
        let task = Task::new(AgentType::Implementation, "run it")
            .with_input(serde_json::json!({"code": "panic!()"}));
        let err = table
            .resolve(AgentType::Implementation)
            .unwrap()
            .execute(&agent(AgentType::Implementation), &task)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with 2: boom"));
    }

    #[tokio::test]
    async fn test_counts_prior_phases() {
        let table = ExecutorTable::default();
        let task = Task::new(AgentType::Architect, "design").with_input(serde_json::json!({
            "request": "x",
            "phases": [{"phase": "specification"}, {"phase": "pseudocode"}],
        }));
        let out = completed(
            table
                .resolve(AgentType::Architect)
                .unwrap()
                .execute(&agent(AgentType::Architect), &task)
                .await
                .unwrap(),
        );
        assert_eq!(out["inputs_considered"], 2);
    }

    #[test]
    fn test_subtask_spec_defaults() {
        let spec: SubtaskSpec = serde_json::from_str(r#"{"description": "part one"}"#).unwrap();
        assert_eq!(spec, SubtaskSpec::new("part one"));
    }
}
