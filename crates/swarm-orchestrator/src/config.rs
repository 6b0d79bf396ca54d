use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use swarm_core::{AgentType, SwarmError, SwarmResult};

/// Top-level configuration for an orchestrator instance.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub boomerang: BoomerangConfig,
    #[serde(default)]
    pub sparc: SparcConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl SwarmConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(raw: &str) -> SwarmResult<Self> {
        let config: SwarmConfig = toml::from_str(raw)
            .map_err(|e| SwarmError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> SwarmResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.registry.max_agents_per_type == 0 {
            return Err(invalid("registry.max_agents_per_type must be at least 1"));
        }
        if !self.registry.seed_default_pool && self.registry.agents.is_empty() {
            return Err(invalid(
                "registry starts empty: enable seed_default_pool or list registry.agents",
            ));
        }
        if let Some(agent_type) = AgentType::ALL
            .into_iter()
            .find(|t| self.registry.initial_count(*t) > self.registry.max_agents_per_type)
        {
            return Err(SwarmError::InvalidConfig(format!(
                "registry starts with more {agent_type} agents than max_agents_per_type ({})",
                self.registry.max_agents_per_type
            )));
        }
        if self.dispatcher.max_in_progress == 0 {
            return Err(invalid("dispatcher.max_in_progress must be at least 1"));
        }
        if self.bus.mailbox_capacity == 0 {
            return Err(invalid("bus.mailbox_capacity must be at least 1"));
        }
        if self.bus.backoff_base_ms == 0 {
            return Err(invalid("bus.backoff_base_ms must be at least 1"));
        }
        if self.boomerang.max_depth == 0 {
            return Err(invalid("boomerang.max_depth must be at least 1"));
        }
        if self.boomerang.max_children == 0 {
            return Err(invalid("boomerang.max_children must be at least 1"));
        }
        if let ChildFailurePolicy::RetryChild { attempts: 0 } = self.boomerang.child_failure {
            return Err(invalid("boomerang.child_failure retry attempts must be at least 1"));
        }
        self.sparc.validate()?;
        if self.tasks.default_timeout_ms == 0 {
            return Err(invalid("tasks.default_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SwarmError {
    SwarmError::InvalidConfig(msg.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_agents_per_type")]
    pub max_agents_per_type: usize,
    /// Seed one agent of every canonical type at startup.
    #[serde(default = "default_true")]
    pub seed_default_pool: bool,
    /// Further agents created at startup, one per entry.
    #[serde(default)]
    pub agents: Vec<AgentType>,
}

impl RegistryConfig {
    /// Agents of `agent_type` the registry starts with.
    pub fn initial_count(&self, agent_type: AgentType) -> usize {
        usize::from(self.seed_default_pool)
            + self.agents.iter().filter(|t| **t == agent_type).count()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_agents_per_type: default_max_agents_per_type(),
            seed_default_pool: true,
            agents: Vec::new(),
        }
    }
}

/// Load-balancing policy used to pick among idle agents of the right type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    RoundRobin,
    #[default]
    LeastLoaded,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    /// Cap on tasks assigned or in progress across the whole swarm.
    #[serde(default = "default_max_in_progress")]
    pub max_in_progress: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::default(),
            max_in_progress: default_max_in_progress(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default = "default_bus_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl BusConfig {
    /// Wait before retry `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            max_retries: default_bus_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// What happens to a boomerang parent when one of its children fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ChildFailurePolicy {
    #[default]
    FailParent,
    /// Re-dispatch the failed child in place up to `attempts` more times.
    RetryChild { attempts: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoomerangConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default)]
    pub child_failure: ChildFailurePolicy,
}

impl Default for BoomerangConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_children: default_max_children(),
            child_failure: ChildFailurePolicy::default(),
        }
    }
}

/// SPARC pipeline settings. Specification and Completion cannot be disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparcConfig {
    #[serde(default = "default_true")]
    pub enable_pseudocode: bool,
    #[serde(default = "default_true")]
    pub enable_architecture: bool,
    #[serde(default = "default_true")]
    pub enable_refinement: bool,
    /// Bound on Refinement review/implementation rounds.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_true")]
    pub auto_advance: bool,
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,
    #[serde(default = "default_phase_priority")]
    pub task_priority: i32,
}

impl SparcConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.enable_refinement && self.max_iterations == 0 {
            return Err(invalid(
                "sparc.max_iterations must be at least 1 when refinement is enabled",
            ));
        }
        if self.phase_timeout_ms == 0 {
            return Err(invalid("sparc.phase_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SparcConfig {
    fn default() -> Self {
        Self {
            enable_pseudocode: true,
            enable_architecture: true,
            enable_refinement: true,
            max_iterations: default_max_iterations(),
            auto_advance: true,
            phase_timeout_ms: default_phase_timeout_ms(),
            task_priority: default_phase_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Wait bound for `await_task` callers that do not pass one.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl TaskConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_task_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_agents_per_type() -> usize {
    10
}

fn default_max_in_progress() -> usize {
    16
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_bus_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    10
}

fn default_backoff_max_ms() -> u64 {
    1_000
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_children() -> usize {
    8
}

fn default_max_iterations() -> u32 {
    3
}

fn default_phase_timeout_ms() -> u64 {
    30_000
}

fn default_phase_priority() -> i32 {
    3
}

fn default_task_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SwarmConfig::from_toml_str("").unwrap();
        assert_eq!(config.registry.max_agents_per_type, 10);
        assert!(config.registry.seed_default_pool);
        assert_eq!(config.dispatcher.strategy, LoadBalanceStrategy::LeastLoaded);
        assert_eq!(config.bus.max_retries, 3);
        assert_eq!(config.boomerang.max_depth, 3);
        assert_eq!(config.sparc.max_iterations, 3);
        assert!(config.sparc.auto_advance);
        assert!(config.sparc.enable_pseudocode);
    }

    #[test]
    fn test_parse_overrides() {
        let raw = r#"
            [dispatcher]
            strategy = "round-robin"
            max_in_progress = 2

            [boomerang]
            max_depth = 5
            child_failure = { policy = "retry_child", attempts = 2 }

            [sparc]
            enable_pseudocode = false
            auto_advance = false
            phase_timeout_ms = 500
        "#;
        let config = SwarmConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.dispatcher.strategy, LoadBalanceStrategy::RoundRobin);
        assert_eq!(config.dispatcher.max_in_progress, 2);
        assert_eq!(config.boomerang.max_depth, 5);
        assert_eq!(
            config.boomerang.child_failure,
            ChildFailurePolicy::RetryChild { attempts: 2 }
        );
        assert!(!config.sparc.enable_pseudocode);
        assert!(!config.sparc.auto_advance);
        assert_eq!(config.sparc.phase_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let err = SwarmConfig::from_toml_str("[dispatcher]\nmax_in_progress = 0").unwrap_err();
        assert!(matches!(err, SwarmError::InvalidConfig(_)));

        let err = SwarmConfig::from_toml_str("[sparc]\nmax_iterations = 0").unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        // Zero iterations is fine when refinement never runs.
        let ok = SwarmConfig::from_toml_str("[sparc]\nmax_iterations = 0\nenable_refinement = false");
        assert!(ok.is_ok());
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let err = SwarmConfig::from_toml_str("[registry]\nseed_default_pool = false").unwrap_err();
        assert!(matches!(err, SwarmError::InvalidConfig(_)));
        assert!(err.to_string().contains("starts empty"));

        let config = SwarmConfig::from_toml_str(
            "[registry]\nseed_default_pool = false\nagents = [\"research\", \"research\"]",
        )
        .unwrap();
        assert_eq!(config.registry.initial_count(AgentType::Research), 2);
        assert_eq!(config.registry.initial_count(AgentType::Review), 0);

        let err = SwarmConfig::from_toml_str(
            "[registry]\nmax_agents_per_type = 1\nagents = [\"review\"]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn test_unknown_strategy_is_invalid_config() {
        let err = SwarmConfig::from_toml_str("[dispatcher]\nstrategy = \"fastest\"").unwrap_err();
        assert!(matches!(err, SwarmError::InvalidConfig(_)));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let bus = BusConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            ..BusConfig::default()
        };
        assert_eq!(bus.backoff(0), Duration::from_millis(100));
        assert_eq!(bus.backoff(1), Duration::from_millis(200));
        assert_eq!(bus.backoff(2), Duration::from_millis(350));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nmax_agents_per_type = 2").unwrap();
        let config = SwarmConfig::load(file.path()).unwrap();
        assert_eq!(config.registry.max_agents_per_type, 2);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = SwarmConfig::load("/nonexistent/swarm.toml").unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
    }
}
