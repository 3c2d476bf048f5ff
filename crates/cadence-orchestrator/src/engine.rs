use crate::agents::AgentRegistry;
use crate::checkpoint::{validate_id, CheckpointEntry, CheckpointStore};
use crate::config::OrchestratorConfig;
use crate::executor::{TaskContext, TaskExecutor};
use crate::graph::build_graph;
use crate::types::{
    AgentInstance, AgentMemory, TaskDescriptor, TaskResult, WaveResult, WorkflowCheckpoint,
    WorkflowResult,
};
use crate::waves::schedule_with_completed;
use cadence_core::{CadenceError, CadenceResult, EventBus};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Wave-based workflow orchestrator.
///
/// Turns a task list into dependency-ordered waves, runs each wave with
/// fan-out/fan-in concurrency and checkpoints after every wave so the
/// workflow can be resumed, possibly by another process.
pub struct Orchestrator {
    config: OrchestratorConfig,
    executor: Arc<dyn TaskExecutor>,
    agents: AgentRegistry,
    store: CheckpointStore,
    events: Option<Arc<dyn EventBus>>,
    workflows: RwLock<HashMap<String, WorkflowResult>>,
}

/// What a finished task hands back at the wave barrier.
struct TaskOutcome {
    result: TaskResult,
    /// Updated agent memory; `None` keeps the registry's copy.
    memory: Option<AgentMemory>,
}

enum Launch {
    Spawned {
        agent_id: String,
        agent_type: String,
        started_at: DateTime<Utc>,
        handle: JoinHandle<TaskOutcome>,
    },
    Rejected(TaskResult),
}

impl Orchestrator {
    /// Create a new orchestrator. Fails if the config does not validate.
    pub fn new(config: OrchestratorConfig, executor: Arc<dyn TaskExecutor>) -> CadenceResult<Self> {
        config.validate()?;
        let store = CheckpointStore::new(config.checkpoint_dir.clone());
        Ok(Self {
            config,
            executor,
            agents: AgentRegistry::new(),
            store,
            events: None,
            workflows: RwLock::new(HashMap::new()),
        })
    }

    /// Attach an event bus notified on workflow lifecycle transitions.
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get a reference to the agent registry.
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Register an idle agent. See [`AgentRegistry::start_agent`].
    pub async fn start_agent(
        &self,
        agent_type: &str,
        task: &str,
        agent_id: Option<String>,
    ) -> CadenceResult<String> {
        self.agents.start_agent(agent_type, task, agent_id).await
    }

    /// Remove an agent; `false` if it was not registered.
    pub async fn stop_agent(&self, agent_id: &str) -> bool {
        self.agents.stop_agent(agent_id).await
    }

    /// Snapshot of one agent, if registered.
    pub async fn get_agent_status(&self, agent_id: &str) -> Option<AgentInstance> {
        self.agents.get_agent_status(agent_id).await
    }

    /// All registered agents.
    pub async fn list_agents(&self) -> Vec<AgentInstance> {
        self.agents.list_agents().await
    }

    /// Last known state of a workflow run by this orchestrator.
    pub async fn workflow(&self, workflow_id: &str) -> Option<WorkflowResult> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Schedule `tasks` into waves and run them to completion.
    ///
    /// A scheduling failure, or a workflow id that cannot name a checkpoint
    /// file, yields a `Failed` workflow with zero waves run.
    /// Task failures are recorded as data and never stop later waves. The
    /// only `Err` is a checkpoint write failure; the failed workflow is still
    /// available through [`Orchestrator::workflow`].
    pub async fn execute_wave_based(
        &self,
        tasks: &[TaskDescriptor],
        workflow_id: Option<String>,
    ) -> CadenceResult<WorkflowResult> {
        let workflow_id = workflow_id.unwrap_or_else(generate_workflow_id);
        let workflow = WorkflowResult::new(&workflow_id, tasks.len());

        info!(workflow_id = %workflow_id, tasks = tasks.len(), "Workflow started");
        self.emit(
            "workflow.started",
            serde_json::json!({ "workflow_id": workflow_id, "steps_total": tasks.len() }),
        )
        .await;

        if let Err(e) = validate_id(&workflow_id, "workflow id") {
            error!(workflow_id = %workflow_id, error = %e, "Rejected workflow id");
            return Ok(self.abort(workflow, "invalid_workflow_id", e.to_string()).await);
        }
        self.drive(workflow, tasks, &HashSet::new()).await
    }

    /// Continue a workflow from a checkpoint with the tasks that have not run yet.
    ///
    /// Only the checkpoint file is read; nothing from a previous session's
    /// memory is consulted. Agents are rebuilt idle with their saved memory,
    /// and new waves are numbered after the checkpoint's wave.
    pub async fn resume_workflow(
        &self,
        checkpoint_id: &str,
        remaining: &[TaskDescriptor],
    ) -> CadenceResult<WorkflowResult> {
        let checkpoint = self.load_checkpoint(checkpoint_id).await?;
        validate_id(&checkpoint.workflow_id, "workflow id")?;
        let restored = self.agents.rematerialize(&checkpoint).await;

        let mut workflow = WorkflowResult::new(
            &checkpoint.workflow_id,
            checkpoint.steps_completed + remaining.len(),
        );
        workflow.steps_completed = checkpoint.steps_completed;
        workflow.waves_completed = checkpoint.wave_id;
        for (agent_id, result) in &checkpoint.completed_tasks {
            if let Some(error) = &result.error {
                workflow.errors.insert(agent_id.clone(), error.clone());
            }
        }
        workflow.results = checkpoint.completed_tasks.clone();

        info!(
            workflow_id = %workflow.workflow_id,
            checkpoint_id = %checkpoint_id,
            restored_agents = restored,
            remaining = remaining.len(),
            "Workflow resumed"
        );
        self.emit(
            "workflow.resumed",
            serde_json::json!({
                "workflow_id": workflow.workflow_id,
                "checkpoint_id": checkpoint_id,
                "wave_id": checkpoint.wave_id,
                "remaining": remaining.len(),
            }),
        )
        .await;

        let completed: HashSet<String> = checkpoint.completed_tasks.keys().cloned().collect();
        self.drive(workflow, remaining, &completed).await
    }

    /// Snapshot a workflow after `wave_id`.
    ///
    /// Returns the checkpoint id, or an empty string without touching the
    /// filesystem when checkpointing is disabled.
    pub async fn save_checkpoint(&self, workflow_id: &str, wave_id: u32) -> CadenceResult<String> {
        if !self.config.enable_checkpoints {
            debug!(workflow_id = %workflow_id, wave = wave_id, "Checkpointing disabled");
            return Ok(String::new());
        }

        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| CadenceError::WorkflowNotFound(workflow_id.to_string()))?;
        let task_ids: Vec<String> = workflow
            .wave_details
            .iter()
            .find(|w| w.wave_number == wave_id)
            .map(|w| w.task_ids.clone())
            .unwrap_or_default();

        let checkpoint =
            WorkflowCheckpoint::capture(&workflow, wave_id, self.agents.memory_snapshot().await)
                .with_metadata("wave_task_ids", serde_json::json!(task_ids))
                .with_metadata("cadence_version", serde_json::json!(env!("CARGO_PKG_VERSION")));

        let path = self.store.save(&checkpoint).await?;
        info!(
            workflow_id = %workflow_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            path = %path.display(),
            "Checkpoint saved"
        );

        if let Some(keep) = self.config.checkpoint_retention {
            self.store.cleanup(workflow_id, keep).await?;
        }
        Ok(checkpoint.checkpoint_id)
    }

    /// Read a checkpoint by id.
    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> CadenceResult<WorkflowCheckpoint> {
        self.store.load(checkpoint_id).await
    }

    /// Delete all but the `keep_latest` newest checkpoints of one workflow.
    pub async fn cleanup_old_checkpoints(
        &self,
        workflow_id: &str,
        keep_latest: usize,
    ) -> CadenceResult<usize> {
        self.store.cleanup(workflow_id, keep_latest).await
    }

    /// Checkpoints of one workflow, oldest first.
    pub async fn list_checkpoints(&self, workflow_id: &str) -> CadenceResult<Vec<CheckpointEntry>> {
        self.store.list(workflow_id).await
    }

    /// The newest checkpoint of one workflow, if any.
    pub async fn latest_checkpoint(
        &self,
        workflow_id: &str,
    ) -> CadenceResult<Option<WorkflowCheckpoint>> {
        self.store.latest(workflow_id).await
    }

    async fn drive(
        &self,
        mut workflow: WorkflowResult,
        tasks: &[TaskDescriptor],
        completed: &HashSet<String>,
    ) -> CadenceResult<WorkflowResult> {
        let graph = build_graph(tasks);
        let waves = match schedule_with_completed(&graph, completed) {
            Ok(waves) => waves,
            Err(e) => {
                error!(workflow_id = %workflow.workflow_id, error = %e, "Scheduling failed");
                return Ok(self.abort(workflow, e.key(), e.to_string()).await);
            }
        };

        let descriptors: HashMap<String, &TaskDescriptor> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.resolved_id(index), task))
            .collect();
        let limit = self
            .config
            .max_parallel
            .map(|max| Arc::new(Semaphore::new(max)));

        info!(
            workflow_id = %workflow.workflow_id,
            waves = waves.len(),
            first_wave = workflow.waves_completed + 1,
            "Execution plan ready"
        );
        self.track(&workflow).await;

        for task_ids in waves {
            let wave_number = workflow.waves_completed + 1;
            let wave = self
                .run_wave(&workflow, wave_number, task_ids, &descriptors, limit.clone())
                .await;

            info!(
                workflow_id = %workflow.workflow_id,
                wave = wave_number,
                succeeded = wave.success_count,
                failed = wave.failure_count,
                "Wave completed"
            );
            let payload = serde_json::json!({
                "workflow_id": workflow.workflow_id,
                "wave": wave_number,
                "task_ids": wave.task_ids,
                "success_count": wave.success_count,
                "failure_count": wave.failure_count,
            });
            workflow.record_wave(wave);
            self.track(&workflow).await;

            if let Err(e) = self.save_checkpoint(&workflow.workflow_id, wave_number).await {
                error!(
                    workflow_id = %workflow.workflow_id,
                    wave = wave_number,
                    error = %e,
                    "Checkpoint failed, stopping workflow"
                );
                workflow.fail("checkpoint", e.to_string());
                self.track(&workflow).await;
                self.emit(
                    "workflow.failed",
                    serde_json::json!({
                        "workflow_id": workflow.workflow_id,
                        "reason": "checkpoint",
                        "message": e.to_string(),
                    }),
                )
                .await;
                return Err(e);
            }
            self.emit("workflow.wave_completed", payload).await;
        }

        workflow.complete();
        self.track(&workflow).await;

        info!(
            workflow_id = %workflow.workflow_id,
            steps_completed = workflow.steps_completed,
            steps_total = workflow.steps_total,
            failed_tasks = workflow.failed_task_count(),
            "Workflow completed"
        );
        self.emit(
            "workflow.completed",
            serde_json::json!({
                "workflow_id": workflow.workflow_id,
                "steps_completed": workflow.steps_completed,
                "steps_total": workflow.steps_total,
                "waves_completed": workflow.waves_completed,
                "failed_tasks": workflow.failed_task_count(),
            }),
        )
        .await;

        Ok(workflow)
    }

    /// Fan out one wave and wait for every task, then merge memories back.
    async fn run_wave(
        &self,
        workflow: &WorkflowResult,
        wave_number: u32,
        task_ids: Vec<String>,
        descriptors: &HashMap<String, &TaskDescriptor>,
        limit: Option<Arc<Semaphore>>,
    ) -> WaveResult {
        let wave_started = Utc::now();
        let mut launches = Vec::with_capacity(task_ids.len());

        for agent_id in &task_ids {
            let Some(descriptor) = descriptors.get(agent_id) else {
                continue;
            };
            let started_at = Utc::now();

            let memory = match self
                .agents
                .dispatch(agent_id, &descriptor.agent_type, &descriptor.task)
                .await
            {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Agent unavailable");
                    launches.push(Launch::Rejected(TaskResult::failed(
                        agent_id.as_str(),
                        descriptor.agent_type.as_str(),
                        started_at,
                        e.to_string(),
                    )));
                    continue;
                }
            };

            let dependency_results: BTreeMap<String, TaskResult> = descriptor
                .depends_on
                .iter()
                .filter_map(|dep| workflow.results.get(dep).map(|r| (dep.clone(), r.clone())))
                .collect();
            let ctx = TaskContext {
                workflow_id: workflow.workflow_id.clone(),
                wave_number,
                agent_id: agent_id.clone(),
                agent_type: descriptor.agent_type.clone(),
                task: descriptor.task.clone(),
                memory,
                dependency_results,
            };
            let timeout = descriptor
                .timeout()
                .or_else(|| self.config.default_task_timeout());

            let handle = tokio::spawn(run_task(
                Arc::clone(&self.executor),
                limit.clone(),
                ctx,
                timeout,
            ));
            launches.push(Launch::Spawned {
                agent_id: agent_id.clone(),
                agent_type: descriptor.agent_type.clone(),
                started_at,
                handle,
            });
        }

        let outcomes = join_all(launches.into_iter().map(|launch| async move {
            match launch {
                Launch::Rejected(result) => (false, TaskOutcome { result, memory: None }),
                Launch::Spawned {
                    agent_id,
                    agent_type,
                    started_at,
                    handle,
                } => match handle.await {
                    Ok(outcome) => (true, outcome),
                    Err(e) => {
                        error!(agent_id = %agent_id, error = %e, "Task aborted");
                        let result = TaskResult::failed(
                            agent_id,
                            agent_type,
                            started_at,
                            format!("Task panicked: {e}"),
                        );
                        (true, TaskOutcome { result, memory: None })
                    }
                },
            }
        }))
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (dispatched, outcome) in outcomes {
            if dispatched {
                self.agents
                    .finish(
                        &outcome.result.agent_id,
                        outcome.result.is_success(),
                        outcome.memory,
                    )
                    .await;
            }
            results.push(outcome.result);
        }

        WaveResult::from_results(wave_number, task_ids, results, wave_started)
    }

    /// Fail a workflow before any wave has been dispatched.
    async fn abort(
        &self,
        mut workflow: WorkflowResult,
        reason: &str,
        message: String,
    ) -> WorkflowResult {
        workflow.fail(reason, message.as_str());
        self.track(&workflow).await;
        self.emit(
            "workflow.failed",
            serde_json::json!({
                "workflow_id": workflow.workflow_id,
                "reason": reason,
                "message": message,
            }),
        )
        .await;
        workflow
    }

    async fn track(&self, workflow: &WorkflowResult) {
        self.workflows
            .write()
            .await
            .insert(workflow.workflow_id.clone(), workflow.clone());
    }

    async fn emit(&self, topic: &str, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            if let Err(e) = bus.publish(topic, payload).await {
                warn!(topic = %topic, error = %e, "Event publish failed");
            }
        }
    }
}

/// Run one task under the concurrency limit and its timeout.
async fn run_task(
    executor: Arc<dyn TaskExecutor>,
    limit: Option<Arc<Semaphore>>,
    mut ctx: TaskContext,
    timeout: Option<Duration>,
) -> TaskOutcome {
    // `acquire_owned` only errors on a closed semaphore; this one is never closed.
    let _permit = match limit {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };
    let agent_id = ctx.agent_id.clone();
    let agent_type = ctx.agent_type.clone();
    let started_at = Utc::now();
    debug!(agent_id = %agent_id, wave = ctx.wave_number, "Task started");

    let result = match timeout {
        Some(after) => {
            let timed = tokio::time::timeout(after, executor.execute(&mut ctx)).await;
            match timed {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = after.as_millis() as u64;
                    warn!(agent_id = %agent_id, timeout_ms, "Task timed out");
                    return TaskOutcome {
                        result: TaskResult::timed_out(agent_id, agent_type, started_at, after),
                        memory: None,
                    };
                }
            }
        }
        None => executor.execute(&mut ctx).await,
    };

    match result {
        Ok(output) => {
            debug!(agent_id = %agent_id, "Task completed");
            TaskOutcome {
                result: TaskResult::completed(agent_id, agent_type, started_at, output),
                memory: Some(ctx.memory),
            }
        }
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "Task failed");
            TaskOutcome {
                result: TaskResult::failed(agent_id, agent_type, started_at, e.to_string()),
                memory: Some(ctx.memory),
            }
        }
    }
}

fn generate_workflow_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("workflow_{}", &uuid[..8])
}
