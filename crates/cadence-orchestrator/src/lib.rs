//! Wave-based workflow orchestration with dependency scheduling and checkpoint/resume.
//!
//! Tasks declare the ids they depend on; the orchestrator layers them into
//! waves of mutually independent work, runs each wave concurrently behind a
//! fan-in barrier, and writes a durable checkpoint after every wave so a long
//! workflow can be resumed in a later process.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Top-level engine: run, checkpoint and resume workflows.
//! - [`AgentRegistry`] — Live agent instances and their memory.
//! - [`CheckpointStore`] — Atomic JSON checkpoint files with per-workflow retention.
//! - [`TaskExecutor`] — Capability contract for running a single task.
//! - [`DependencyGraph`] — Task ids mapped to the ids they depend on.

/// Agent lifecycle and memory registry.
pub mod agents;
/// Durable checkpoint files.
pub mod checkpoint;
/// Orchestrator settings.
pub mod config;
/// Wave execution engine.
pub mod engine;
/// Task execution capability.
pub mod executor;
/// Dependency graph builder.
pub mod graph;
/// Data model shared by the engine and checkpoints.
pub mod types;
/// Topological layering into waves.
pub mod waves;

pub use agents::AgentRegistry;
pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use config::OrchestratorConfig;
pub use engine::Orchestrator;
pub use executor::{TaskContext, TaskExecutor};
pub use graph::{build_graph, DependencyGraph};
pub use types::{
    AgentInstance, AgentMemory, AgentState, TaskDescriptor, TaskResult, TaskStatus, WaveResult,
    WorkflowCheckpoint, WorkflowResult, WorkflowState,
};
pub use waves::{schedule, schedule_with_completed};
