//! Orchestration core for a swarm of specialised agents.
//!
//! Tracks an agent pool, dispatches tasks to idle agents under a
//! load-balancing strategy, moves messages between agents, lets agents split
//! oversized tasks into subtasks, and drives SPARC workflows through their
//! five phases.
//!
//! # Main types
//!
//! - [`AgentRegistry`]: Agent pool and task ledger behind one lock.
//! - [`Dispatcher`]: Matches pending tasks to idle agents; queues the rest.
//! - [`MessageBus`]: Direct, broadcast and request/response delivery.
//! - [`BoomerangEngine`]: Delegation tree for decomposed tasks.
//! - [`Orchestrator`]: Runs agent workers and consumes completion reports.
//! - [`SparcEngine`]: SPARC workflow state machine.
//! - [`SwarmConfig`]: TOML-loadable settings for all of the above.

/// Boomerang task decomposition.
pub mod boomerang;
/// In-process message bus and mailboxes.
pub mod bus;
/// Configuration.
pub mod config;
/// Load-balanced dispatch.
pub mod dispatcher;
/// Orchestrator runtime.
pub mod engine;
/// Pluggable agent executors.
pub mod executor;
/// Interfaces to external services.
pub mod external;
/// Agent pool and task ledger.
pub mod registry;
/// SPARC workflow engine.
pub mod sparc;
/// Agent teams.
pub mod team;
/// Agent worker loop and completion reports.
pub mod worker;

pub use boomerang::{BoomerangEngine, Cascade, CANCELLED_REASON};
pub use bus::{Mailbox, MessageBus};
pub use config::{
    BoomerangConfig, BusConfig, ChildFailurePolicy, DispatcherConfig, LoadBalanceStrategy,
    RegistryConfig, SparcConfig, SwarmConfig, TaskConfig,
};
pub use dispatcher::{
    strategy_for, Dispatcher, LeastLoaded, RandomPick, RoundRobin, SelectionStrategy, Submission,
};
pub use engine::Orchestrator;
pub use executor::{AgentExecutor, ExecutionOutcome, ExecutorTable, SubtaskSpec};
pub use external::{
    CodeSandbox, Collaborators, DecisionEntry, DecisionLog, InMemoryDecisionLog,
    InMemoryTaskStore, PersistedTask, SandboxLimits, SandboxOutput, SearchHit, SearchService,
    SkillCorrelator, TaskStore,
};
pub use registry::{AgentAssignment, AgentFilter, AgentRegistry, SwarmStats, TaskFilter};
pub use sparc::{PhaseState, SparcEngine, SparcWorkflow, WorkflowReport, WorkflowStatusView};
pub use team::{Team, TeamManager};
pub use worker::{CompletionReport, ReportOutcome};
