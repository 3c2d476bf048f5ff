use cadence_core::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Schema-free key/value record an agent accumulates while it works.
pub type AgentMemory = HashMap<String, serde_json::Value>;

/// A unit of work submitted to a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Kind of worker that should handle the task.
    pub agent_type: String,
    /// Free-form instruction text.
    pub task: String,
    /// Unique id; `task_<index>` is synthesized from the input position when absent.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Ids that must complete before this task runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-task timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskDescriptor {
    /// Create a task with no explicit id, dependencies or timeout.
    pub fn new(agent_type: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            task: task.into(),
            agent_id: None,
            depends_on: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Set the agent id.
    pub fn with_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the ids this task waits for.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set a per-task timeout, overriding the orchestrator default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The per-task timeout, if one was set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// The explicit id, or `task_<index>` for the given input position.
    pub fn resolved_id(&self, index: usize) -> String {
        self.agent_id
            .clone()
            .unwrap_or_else(|| format!("task_{index}"))
    }
}

/// Lifecycle state of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Registered and not running.
    Idle,
    /// Executing a task.
    Running,
    /// Last task succeeded.
    Completed,
    /// Last task failed, timed out or panicked.
    Failed,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::Completed => write!(f, "completed"),
            AgentState::Failed => write!(f, "failed"),
        }
    }
}

/// A live worker bound to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    /// Registry key.
    pub agent_id: String,
    /// Kind of worker.
    pub agent_type: String,
    /// Task currently or most recently bound to the agent.
    pub task: String,
    /// Lifecycle state.
    pub state: AgentState,
    /// The only part of an agent that survives a checkpoint/resume cycle.
    #[serde(default)]
    pub memory: AgentMemory,
    /// Set when the agent is dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when its task finishes.
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentInstance {
    /// A fresh idle agent with empty memory.
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            task: task.into(),
            state: AgentState::Idle,
            memory: AgentMemory::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Outcome status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The executor returned a value.
    Completed,
    /// The executor returned an error, panicked or the agent was unavailable.
    Failed,
    /// The task ran past its timeout.
    TimedOut,
}

/// The recorded outcome of one task, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Id of the agent that ran the task.
    pub agent_id: String,
    /// Kind of worker that ran the task.
    pub agent_type: String,
    /// How the task ended.
    pub status: TaskStatus,
    /// Executor output; present only for completed tasks. An explicit JSON
    /// `null` output stays `Some(Null)`; the key is omitted when absent.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub output: Option<serde_json::Value>,
    /// Failure reason; present only for failed or timed-out tasks.
    #[serde(default)]
    pub error: Option<String>,
    /// When the task was handed to its executor.
    pub started_at: DateTime<Utc>,
    /// When the outcome was recorded.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock time between the two timestamps.
    pub duration_ms: u64,
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl TaskResult {
    /// Outcome of a task whose executor returned `output`.
    pub fn completed(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        started_at: DateTime<Utc>,
        output: serde_json::Value,
    ) -> Self {
        Self::finish(agent_id, agent_type, started_at, TaskStatus::Completed)
            .with_output(output)
    }

    /// Outcome of a task whose executor returned an error.
    pub fn failed(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self::finish(agent_id, agent_type, started_at, TaskStatus::Failed).with_error(error)
    }

    /// Outcome of a task that ran past its timeout.
    pub fn timed_out(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        started_at: DateTime<Utc>,
        after: Duration,
    ) -> Self {
        Self::finish(agent_id, agent_type, started_at, TaskStatus::TimedOut)
            .with_error(format!("Task timed out after {}ms", after.as_millis()))
    }

    fn finish(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        started_at: DateTime<Utc>,
        status: TaskStatus,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            status,
            output: None,
            error: None,
            started_at,
            completed_at,
            duration_ms,
        }
    }

    fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the task completed.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Outcome of one wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveResult {
    /// 1-based, and continues from the checkpoint's wave on resume.
    pub wave_number: u32,
    /// Ids scheduled into this wave.
    pub task_ids: Vec<String>,
    /// One outcome per task id.
    pub results: Vec<TaskResult>,
    /// When the first task was dispatched.
    pub started_at: DateTime<Utc>,
    /// When the barrier was crossed.
    pub completed_at: DateTime<Utc>,
    /// Tasks that completed.
    pub success_count: usize,
    /// Tasks that failed or timed out.
    pub failure_count: usize,
}

impl WaveResult {
    /// Builds the record for a wave whose barrier has just been crossed.
    /// `success_count + failure_count` always equals `results.len()`.
    pub fn from_results(
        wave_number: u32,
        task_ids: Vec<String>,
        results: Vec<TaskResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;
        Self {
            wave_number,
            task_ids,
            results,
            started_at,
            completed_at: Utc::now(),
            success_count,
            failure_count,
        }
    }
}

/// State of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Waves are still being run.
    Running,
    /// Every wave ran; individual tasks may still have failed.
    Completed,
    /// Stopped by a scheduling or checkpoint failure.
    Failed,
}

impl WorkflowState {
    /// Whether the run has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Running => write!(f, "running"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate record of a workflow run. Frozen once `state` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Caller-supplied or generated id.
    pub workflow_id: String,
    /// Current state.
    pub state: WorkflowState,
    /// Tasks submitted, including those restored from a checkpoint.
    pub steps_total: usize,
    /// Tasks that have an outcome, success or failure.
    pub steps_completed: usize,
    /// Cumulative per-task outcomes keyed by agent id.
    pub results: BTreeMap<String, TaskResult>,
    /// Named failure reasons (`circular_dependency`, ...) and per-task errors keyed by agent id.
    pub errors: BTreeMap<String, String>,
    /// Highest wave number finished.
    pub waves_completed: u32,
    /// Per-wave records in execution order.
    pub wave_details: Vec<WaveResult>,
    /// When the run (or resume) began.
    pub started_at: DateTime<Utc>,
    /// Set once the state is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowResult {
    /// A running workflow with nothing recorded yet.
    pub fn new(workflow_id: impl Into<String>, steps_total: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            state: WorkflowState::Running,
            steps_total,
            steps_completed: 0,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            waves_completed: 0,
            wave_details: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Merges a finished wave into the running totals.
    /// Returns `false` (and changes nothing) once the workflow is terminal.
    pub fn record_wave(&mut self, wave: WaveResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        for result in &wave.results {
            if let Some(error) = &result.error {
                self.errors.insert(result.agent_id.clone(), error.clone());
            }
            self.results.insert(result.agent_id.clone(), result.clone());
        }
        self.steps_completed += wave.results.len();
        self.waves_completed = self.waves_completed.max(wave.wave_number);
        self.wave_details.push(wave);
        true
    }

    /// Mark the workflow completed.
    pub fn complete(&mut self) -> bool {
        self.finish(WorkflowState::Completed)
    }

    /// Fails the workflow with a named reason.
    pub fn fail(&mut self, key: impl Into<String>, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.errors.insert(key.into(), message.into());
        self.finish(WorkflowState::Failed)
    }

    fn finish(&mut self, state: WorkflowState) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = state;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Number of recorded task outcomes that did not succeed.
    pub fn failed_task_count(&self) -> usize {
        self.results.values().filter(|r| !r.is_success()).count()
    }
}

/// Durable snapshot taken after a completed wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Deterministic id, see [`WorkflowCheckpoint::make_id`].
    pub checkpoint_id: String,
    /// Workflow the snapshot belongs to.
    pub workflow_id: String,
    /// Number of the wave just completed; the primary ordering key.
    pub wave_id: u32,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Mirror of `WorkflowResult.state` at snapshot time.
    pub workflow_state: String,
    /// Tasks with an outcome at snapshot time.
    pub steps_completed: usize,
    /// Tasks submitted to the run.
    pub steps_total: usize,
    /// Cumulative results up to and including `wave_id`.
    pub completed_tasks: BTreeMap<String, TaskResult>,
    /// Memory of every registered agent, keyed by agent id.
    pub agent_memories: BTreeMap<String, AgentMemory>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowCheckpoint {
    /// Deterministic id; saving the same pair twice overwrites.
    pub fn make_id(workflow_id: &str, wave_id: u32) -> String {
        format!("{workflow_id}_wave{wave_id}")
    }

    /// Snapshot a running workflow after `wave_id`.
    pub fn capture(
        workflow: &WorkflowResult,
        wave_id: u32,
        agent_memories: BTreeMap<String, AgentMemory>,
    ) -> Self {
        Self {
            checkpoint_id: Self::make_id(&workflow.workflow_id, wave_id),
            workflow_id: workflow.workflow_id.clone(),
            wave_id,
            timestamp: Utc::now(),
            workflow_state: workflow.state.to_string(),
            steps_completed: workflow.steps_completed,
            steps_total: workflow.steps_total,
            completed_tasks: workflow.results.clone(),
            agent_memories,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serializes into a plain JSON value using the on-disk field names.
    pub fn to_value(&self) -> CadenceResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Inverse of [`WorkflowCheckpoint::to_value`].
    pub fn from_value(value: serde_json::Value) -> CadenceResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| CadenceError::Checkpoint(format!("Malformed checkpoint: {e}")))
    }
}
