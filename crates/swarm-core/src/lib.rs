//! Core types and error definitions for the swarm orchestration core.
//!
//! This crate provides the foundational types shared by the orchestrator:
//! the error taxonomy, agent and task records, SPARC phase types and the
//! message type carried by the message bus.
//!
//! # Main types
//!
//! - [`SwarmError`]: Unified error enum for every orchestration subsystem.
//! - [`SwarmResult`]: Convenience alias for `Result<T, SwarmError>`.
//! - [`Agent`] / [`AgentType`] / [`AgentStatus`]: Agent records and lifecycle.
//! - [`Task`] / [`TaskStatus`]: Units of work and their lifecycle.
//! - [`SparcPhase`] / [`PhaseResult`] / [`WorkflowFailure`]: SPARC pipeline records.
//! - [`Message`]: A message delivered by the bus.

/// Error taxonomy.
pub mod error;
/// Bus message types.
pub mod message;
/// Agent and task records.
pub mod types;
/// SPARC phase and workflow records.
pub mod workflow;

pub use error::{SwarmError, SwarmResult};
pub use message::{Message, MessageKind, MessagePriority, ORCHESTRATOR_ENDPOINT};
pub use types::{
    Agent, AgentId, AgentMetrics, AgentStatus, AgentType, ResourceLimits, Task, TaskId,
    TaskStatus, WorkflowId,
};
pub use workflow::{PhaseResult, PhaseStatus, SparcPhase, WorkflowFailure, WorkflowStatus};
