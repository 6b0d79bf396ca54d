use crate::config::{BoomerangConfig, ChildFailurePolicy};
use crate::executor::SubtaskSpec;
use crate::registry::AgentRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use swarm_core::{SwarmError, SwarmResult, Task, TaskId, TaskStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Failure reason used for tasks stopped by a cancellation request.
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone)]
struct DelegationNode {
    /// Child ids in creation order. A retried child replaces its slot.
    children: Vec<TaskId>,
    retries: Vec<u32>,
}

/// Parent/child bookkeeping for blocked tasks. Parents are referenced by id
/// only; the registry owns the task records.
#[derive(Debug, Default)]
struct DelegationTree {
    nodes: HashMap<TaskId, DelegationNode>,
    /// child -> parent
    parents: HashMap<TaskId, TaskId>,
    /// Final child lists of parents that have settled.
    settled: HashMap<TaskId, Vec<TaskId>>,
}

impl DelegationTree {
    fn insert(&mut self, parent: TaskId, children: &[TaskId]) {
        for child in children {
            self.parents.insert(*child, parent);
        }
        self.nodes.insert(
            parent,
            DelegationNode {
                children: children.to_vec(),
                retries: vec![0; children.len()],
            },
        );
    }

    fn remove(&mut self, parent: TaskId) -> Option<DelegationNode> {
        let node = self.nodes.remove(&parent)?;
        for child in &node.children {
            self.parents.remove(child);
        }
        self.settled.insert(parent, node.children.clone());
        Some(node)
    }

    /// Every descendant of `root`.
    fn descendants(&self, root: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut frontier = vec![root];
        while let Some(id) = frontier.pop() {
            if let Some(node) = self.nodes.get(&id) {
                out.extend(node.children.iter().copied());
                frontier.extend(node.children.iter().copied());
            }
        }
        out
    }
}

/// Follow-up work produced when a task reaches a terminal state.
#[derive(Debug, Default)]
pub struct Cascade {
    /// Parents that became terminal, innermost first.
    pub resolved: Vec<Task>,
    /// Replacement children to dispatch.
    pub retries: Vec<Task>,
}

enum Step {
    Waiting,
    Retry(Task),
    ParentDone(Task),
}

/// Splits oversized tasks into children and folds their results back into
/// the parent once every child has finished.
pub struct BoomerangEngine {
    registry: Arc<AgentRegistry>,
    config: BoomerangConfig,
    tree: Mutex<DelegationTree>,
}

impl BoomerangEngine {
    pub fn new(registry: Arc<AgentRegistry>, config: BoomerangConfig) -> Self {
        Self {
            registry,
            config,
            tree: Mutex::new(DelegationTree::default()),
        }
    }

    /// Block `parent_id` and register one child per spec.
    ///
    /// The children are returned pending; the caller dispatches them. On
    /// error nothing has changed and the caller should fail the parent.
    pub async fn decompose(&self, parent_id: TaskId, specs: Vec<SubtaskSpec>) -> SwarmResult<Vec<Task>> {
        let parent = self.registry.get_task(parent_id).await?;
        let depth = parent.depth + 1;
        if depth > self.config.max_depth {
            warn!(task_id = %parent_id, depth, max_depth = self.config.max_depth, "Decomposition too deep");
            return Err(SwarmError::DecompositionDepthExceeded {
                task_id: parent_id,
                depth,
                max_depth: self.config.max_depth,
            });
        }
        if specs.is_empty() {
            return Err(SwarmError::Execution(format!(
                "task {parent_id} asked to decompose into no subtasks"
            )));
        }
        if specs.len() > self.config.max_children {
            return Err(SwarmError::InvalidConfig(format!(
                "task {parent_id} asked for {} subtasks (max {})",
                specs.len(),
                self.config.max_children
            )));
        }

        let parent = self.registry.block_task(parent_id).await?;
        let children: Vec<Task> = specs.iter().map(|spec| child_from_spec(&parent, spec)).collect();
        let ids: Vec<TaskId> = children.iter().map(|c| c.id).collect();
        self.tree.lock().await.insert(parent_id, &ids);
        for child in &children {
            self.registry.insert_task(child.clone()).await?;
        }
        info!(task_id = %parent_id, children = children.len(), depth, "Task decomposed");
        Ok(children)
    }

    /// React to `task` becoming terminal: retry it, resolve its parent, and
    /// keep walking up while ancestors resolve.
    pub async fn on_task_terminal(&self, task: &Task) -> SwarmResult<Cascade> {
        let mut cascade = Cascade::default();
        let mut current = task.clone();
        loop {
            match self.step(&current).await? {
                Step::Waiting => break,
                Step::Retry(child) => {
                    cascade.retries.push(child);
                    break;
                }
                Step::ParentDone(parent) => {
                    cascade.resolved.push(parent.clone());
                    current = parent;
                }
            }
        }
        Ok(cascade)
    }

    /// Fail every unfinished descendant of `root` and forget its subtree.
    pub async fn cancel_subtree(&self, root: TaskId) -> Vec<TaskId> {
        let descendants = {
            let mut tree = self.tree.lock().await;
            let descendants = tree.descendants(root);
            tree.remove(root);
            for id in &descendants {
                tree.remove(*id);
            }
            descendants
        };
        let mut cancelled = Vec::new();
        for id in descendants {
            if self.registry.fail_task(id, CANCELLED_REASON).await.is_ok() {
                cancelled.push(id);
            }
        }
        if !cancelled.is_empty() {
            debug!(task_id = %root, cancelled = cancelled.len(), "Cancelled boomerang children");
        }
        cancelled
    }

    /// Children of a parent in creation order, whether it is still blocked
    /// or has settled. A retried child appears as its replacement.
    pub async fn children_of(&self, parent: TaskId) -> Vec<TaskId> {
        let tree = self.tree.lock().await;
        tree.nodes
            .get(&parent)
            .map(|n| n.children.clone())
            .or_else(|| tree.settled.get(&parent).cloned())
            .unwrap_or_default()
    }

    pub async fn blocked_parents(&self) -> usize {
        self.tree.lock().await.nodes.len()
    }

    async fn step(&self, task: &Task) -> SwarmResult<Step> {
        if !task.status.is_terminal() {
            return Ok(Step::Waiting);
        }
        let mut guard = self.tree.lock().await;
        let tree = &mut *guard;
        let Some(parent_id) = tree.parents.get(&task.id).copied() else {
            return Ok(Step::Waiting);
        };

        if let TaskStatus::Failed { reason } = &task.status {
            if let ChildFailurePolicy::RetryChild { attempts } = self.config.child_failure {
                let node = tree
                    .nodes
                    .get_mut(&parent_id)
                    .ok_or(SwarmError::TaskNotFound(parent_id))?;
                let slot = node.children.iter().position(|c| *c == task.id);
                if let Some(slot) = slot {
                    if reason != CANCELLED_REASON && node.retries[slot] < attempts {
                        node.retries[slot] += 1;
                        let mut replacement = Task::new(task.task_type, task.description.clone())
                            .with_priority(task.priority);
                        replacement.parent = task.parent;
                        replacement.depth = task.depth;
                        replacement.input = task.input.clone();
                        replacement.workflow_id = task.workflow_id;
                        node.children[slot] = replacement.id;
                        tree.parents.remove(&task.id);
                        tree.parents.insert(replacement.id, parent_id);
                        drop(guard);
                        info!(task_id = %task.id, replacement = %replacement.id, reason = %reason, "Retrying failed child");
                        self.registry.insert_task(replacement.clone()).await?;
                        return Ok(Step::Retry(replacement));
                    }
                }
            }
        }

        let children = tree
            .nodes
            .get(&parent_id)
            .map(|n| n.children.clone())
            .ok_or(SwarmError::TaskNotFound(parent_id))?;
        let mut results = Vec::with_capacity(children.len());
        let mut first_failure = None;
        for child_id in &children {
            let child = self.registry.get_task(*child_id).await?;
            match child.status {
                TaskStatus::Completed => {
                    results.push(child.result.unwrap_or(serde_json::Value::Null));
                }
                TaskStatus::Failed { reason } => {
                    first_failure.get_or_insert((*child_id, reason));
                }
                _ => return Ok(Step::Waiting),
            }
        }
        tree.remove(parent_id);
        drop(guard);

        let parent = match first_failure {
            None => {
                debug!(task_id = %parent_id, children = results.len(), "All children completed");
                self.registry
                    .complete_task(parent_id, serde_json::Value::Array(results))
                    .await?
            }
            Some((child_id, reason)) => {
                warn!(task_id = %parent_id, child = %child_id, reason = %reason, "Child failed; failing parent");
                self.registry
                    .fail_task(parent_id, format!("subtask {child_id} failed: {reason}"))
                    .await?
            }
        };
        Ok(Step::ParentDone(parent))
    }
}

fn child_from_spec(parent: &Task, spec: &SubtaskSpec) -> Task {
    let mut child = Task::child_of(
        parent,
        spec.task_type.unwrap_or(parent.task_type),
        spec.description.clone(),
    );
    if let Some(priority) = spec.priority {
        child.priority = priority;
    }
    if let Some(input) = &spec.input {
        child.input = Some(input.clone());
    }
    child
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::dispatcher::{LeastLoaded, Dispatcher};
    use swarm_core::AgentType;

    struct Fixture {
        registry: Arc<AgentRegistry>,
        dispatcher: Dispatcher,
        engine: BoomerangEngine,
    }

    fn fixture(config: BoomerangConfig) -> Fixture {
        let registry = Arc::new(AgentRegistry::new(&RegistryConfig::default()));
        Fixture {
            dispatcher: Dispatcher::with_strategy(registry.clone(), Box::new(LeastLoaded), 64),
            engine: BoomerangEngine::new(registry.clone(), config),
            registry,
        }
    }

    impl Fixture {
        /// Dispatch and start `task`, as the agent runtime would.
        async fn run(&self, task: Task) -> TaskId {
            let id = task.id;
            if self.registry.get_task(id).await.is_err() {
                self.dispatcher.delegate(task).await.unwrap();
            } else {
                self.dispatcher.assign_or_queue(&task).await.unwrap();
            }
            self.registry.mark_in_progress(id).await.unwrap();
            id
        }

        async fn finish(&self, id: TaskId, result: serde_json::Value) -> Cascade {
            let task = self.registry.complete_task(id, result).await.unwrap();
            self.engine.on_task_terminal(&task).await.unwrap()
        }

        async fn fail(&self, id: TaskId) -> Cascade {
            let task = self.registry.fail_task(id, "broken").await.unwrap();
            self.engine.on_task_terminal(&task).await.unwrap()
        }
    }

    fn specs(n: usize) -> Vec<SubtaskSpec> {
        (0..n).map(|i| SubtaskSpec::new(format!("part {i}"))).collect()
    }

    #[tokio::test]
    async fn test_parent_completes_with_results_in_creation_order() {
        let f = fixture(BoomerangConfig::default());
        let parent = f
            .run(Task::new(AgentType::Documentation, "write all docs").with_priority(4))
            .await;
        let children = f.engine.decompose(parent, specs(3)).await.unwrap();
        assert_eq!(f.registry.get_task(parent).await.unwrap().status, TaskStatus::Blocked);
        assert!(children.iter().all(|c| c.parent == Some(parent) && c.depth == 1 && c.priority == 4));

        // Finish out of order; only one documentation agent, so run serially.
        let ids: Vec<TaskId> = children.iter().map(|c| c.id).collect();
        for (i, id) in [2usize, 0, 1].into_iter().map(|i| (i, ids[i])) {
            f.run(children[i].clone()).await;
            let cascade = f.finish(id, serde_json::json!(format!("r{i}"))).await;
            if i != 1 {
                assert!(cascade.resolved.is_empty());
                assert_eq!(f.registry.get_task(parent).await.unwrap().status, TaskStatus::Blocked);
            } else {
                assert_eq!(cascade.resolved.len(), 1);
            }
        }

        let parent_task = f.registry.get_task(parent).await.unwrap();
        assert_eq!(parent_task.status, TaskStatus::Completed);
        assert_eq!(parent_task.result.unwrap(), serde_json::json!(["r0", "r1", "r2"]));
        assert_eq!(f.engine.blocked_parents().await, 0);
        assert_eq!(f.engine.children_of(parent).await, ids);
        assert!(f.registry.consistency_violations().await.is_empty());
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let f = fixture(BoomerangConfig {
            max_depth: 1,
            ..BoomerangConfig::default()
        });
        let root = f.run(Task::new(AgentType::Research, "root")).await;
        let children = f.engine.decompose(root, specs(1)).await.unwrap();
        let child = f.run(children[0].clone()).await;
        let err = f.engine.decompose(child, specs(2)).await.unwrap_err();
        assert!(matches!(
            err,
            SwarmError::DecompositionDepthExceeded { depth: 2, max_depth: 1, .. }
        ));
        // Nothing changed for the child.
        assert_eq!(f.registry.get_task(child).await.unwrap().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_max_children_and_empty_rejected() {
        let f = fixture(BoomerangConfig {
            max_children: 2,
            ..BoomerangConfig::default()
        });
        let root = f.run(Task::new(AgentType::Testing, "root")).await;
        assert!(f.engine.decompose(root, specs(3)).await.is_err());
        assert!(f.engine.decompose(root, Vec::new()).await.is_err());
        assert_eq!(f.registry.get_task(root).await.unwrap().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_failed_child_fails_parent_after_siblings_finish() {
        let f = fixture(BoomerangConfig::default());
        let parent = f.run(Task::new(AgentType::Review, "review all")).await;
        let children = f.engine.decompose(parent, specs(2)).await.unwrap();

        f.run(children[0].clone()).await;
        let cascade = f.fail(children[0].id).await;
        assert!(cascade.resolved.is_empty());

        f.run(children[1].clone()).await;
        let cascade = f.finish(children[1].id, serde_json::json!("ok")).await;
        assert_eq!(cascade.resolved.len(), 1);
        match &f.registry.get_task(parent).await.unwrap().status {
            TaskStatus::Failed { reason } => assert!(reason.contains("broken")),
            other => panic!("unexpected status {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_child_policy() {
        let f = fixture(BoomerangConfig {
            child_failure: ChildFailurePolicy::RetryChild { attempts: 1 },
            ..BoomerangConfig::default()
        });
        let parent = f.run(Task::new(AgentType::Debugger, "fix all")).await;
        let children = f.engine.decompose(parent, specs(1)).await.unwrap();

        f.run(children[0].clone()).await;
        let cascade = f.fail(children[0].id).await;
        assert_eq!(cascade.retries.len(), 1);
        let replacement = cascade.retries[0].clone();
        assert_eq!(replacement.description, "part 0");
        assert_eq!(f.engine.children_of(parent).await, vec![replacement.id]);

        f.run(replacement.clone()).await;
        let cascade = f.fail(replacement.id).await;
        assert!(cascade.retries.is_empty());
        assert_eq!(cascade.resolved.len(), 1);
        assert!(matches!(
            f.registry.get_task(parent).await.unwrap().status,
            TaskStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_nested_resolution_walks_up() {
        let f = fixture(BoomerangConfig::default());
        let root = f.run(Task::new(AgentType::Architect, "root")).await;
        let level1 = f.engine.decompose(root, specs(1)).await.unwrap();
        let mid = f.run(level1[0].clone()).await;
        let level2 = f.engine.decompose(mid, specs(1)).await.unwrap();
        let leaf = f.run(level2[0].clone()).await;

        let cascade = f.finish(leaf, serde_json::json!("leaf")).await;
        let resolved: Vec<TaskId> = cascade.resolved.iter().map(|t| t.id).collect();
        assert_eq!(resolved, vec![mid, root]);
        assert_eq!(
            f.registry.get_task(root).await.unwrap().result.unwrap(),
            serde_json::json!([["leaf"]])
        );
    }

    #[tokio::test]
    async fn test_cancel_subtree() {
        let f = fixture(BoomerangConfig::default());
        let root = f.run(Task::new(AgentType::Implementation, "root")).await;
        let children = f.engine.decompose(root, specs(2)).await.unwrap();
        f.run(children[0].clone()).await;

        let cancelled = f.engine.cancel_subtree(root).await;
        assert_eq!(cancelled.len(), 2);
        for child in &children {
            assert!(f.registry.get_task(child.id).await.unwrap().status.is_terminal());
        }
        assert_eq!(f.engine.blocked_parents().await, 0);
        assert!(f.registry.consistency_violations().await.is_empty());
    }

    #[test]
    fn test_spec_overrides() {
        let parent = Task::new(AgentType::Research, "p")
            .with_priority(2)
            .with_input(serde_json::json!({"a": 1}));
        let inherited = child_from_spec(&parent, &SubtaskSpec::new("c"));
        assert_eq!(inherited.task_type, AgentType::Research);
        assert_eq!(inherited.input, parent.input);

        let spec = SubtaskSpec::new("c")
            .of_type(AgentType::Testing)
            .with_input(serde_json::json!({"b": 2}));
        let overridden = child_from_spec(&parent, &spec);
        assert_eq!(overridden.task_type, AgentType::Testing);
        assert_eq!(overridden.input, Some(serde_json::json!({"b": 2})));
        assert_eq!(overridden.priority, 2);
    }
}
