//! Core types and error definitions for the Cadence orchestrator.
//!
//! This crate holds what every other Cadence crate shares: the unified error
//! type, the scheduling error taxonomy, and the boundaries the orchestrator
//! talks to without owning (event bus, task router).
//!
//! # Main types
//!
//! - [`CadenceError`] — Unified error enum for all Cadence subsystems.
//! - [`CadenceResult`] — Convenience alias for `Result<T, CadenceError>`.
//! - [`SchedulingError`] — Why a dependency graph could not be layered into waves.
//! - [`EventBus`] — Publish/subscribe sink for workflow lifecycle events.
//! - [`RoutingDecision`] — Single- vs multi-agent hint produced by a task router.

/// Event bus boundary for workflow lifecycle notifications.
pub mod event;
/// Task router boundary types.
pub mod routing;

pub use event::{BroadcastEventBus, EventBus, WorkflowEvent};
pub use routing::{RoutingDecision, RoutingStrategy};

// --- Error types ---

/// Top-level error type for Cadence.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// The task dependency graph cannot be turned into waves.
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// `start_agent` was called with an id that is already registered.
    #[error("Agent already exists: {0}")]
    DuplicateAgent(String),

    /// No checkpoint file exists for the requested id.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// A checkpoint could not be written, read, or parsed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The orchestrator has no record of the requested workflow.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A task failed while executing.
    #[error("Task error: {0}")]
    Task(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CadenceError`].
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Reasons a dependency graph cannot be layered into waves.
///
/// All of these are detected before any task is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    /// The graph contains a cycle (a self-dependency counts).
    #[error("{0}")]
    CircularDependency(String),

    /// A task depends on an id that is neither submitted nor already completed.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The task declaring the dependency.
        task: String,
        /// The id that could not be resolved.
        dependency: String,
    },

    /// Two submitted tasks share the same agent id.
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),
}

impl SchedulingError {
    /// Stable key used for this failure in `WorkflowResult.errors`.
    pub fn key(&self) -> &'static str {
        match self {
            SchedulingError::CircularDependency(_) => "circular_dependency",
            SchedulingError::UnknownDependency { .. } => "unknown_dependency",
            SchedulingError::DuplicateTask(_) => "duplicate_task",
        }
    }
}
