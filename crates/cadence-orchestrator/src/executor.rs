use crate::types::{AgentMemory, TaskResult};
use cadence_core::CadenceResult;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Everything a task sees while it runs.
///
/// Each task owns its context, so concurrent tasks in a wave never share
/// mutable state. `memory` is written back to the agent registry at the
/// wave barrier.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Workflow the task belongs to.
    pub workflow_id: String,
    /// Wave the task runs in.
    pub wave_number: u32,
    /// Id of the agent running the task.
    pub agent_id: String,
    /// Kind of worker requested.
    pub agent_type: String,
    /// Instruction text.
    pub task: String,
    /// The agent's memory; mutations persist once the task finishes.
    pub memory: AgentMemory,
    /// Outcomes of this task's prerequisites.
    pub dependency_results: BTreeMap<String, TaskResult>,
}

impl TaskContext {
    /// Output of a completed prerequisite, if it produced one.
    pub fn dependency_output(&self, agent_id: &str) -> Option<&serde_json::Value> {
        self.dependency_results
            .get(agent_id)
            .and_then(|r| r.output.as_ref())
    }
}

/// Capability contract for running a single task.
///
/// Implementations decide what an agent actually does. Returning `Err`
/// records a failed outcome for the task; it never aborts the workflow.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task described by `ctx`, mutating `ctx.memory` as needed.
    async fn execute(&self, ctx: &mut TaskContext) -> CadenceResult<serde_json::Value>;
}
