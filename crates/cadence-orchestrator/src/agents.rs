use crate::types::{AgentInstance, AgentMemory, AgentState, WorkflowCheckpoint};
use cadence_core::{CadenceError, CadenceResult};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of live agent instances.
///
/// Memory is stored verbatim: the registry never inspects it, and only
/// replaces it when a finished task hands back its updated copy.
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentInstance>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new idle agent. Fails if `agent_id` is already registered.
    pub async fn start_agent(
        &self,
        agent_type: &str,
        task: &str,
        agent_id: Option<String>,
    ) -> CadenceResult<String> {
        let agent_id = agent_id.unwrap_or_else(generate_agent_id);
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent_id) {
            return Err(CadenceError::DuplicateAgent(agent_id));
        }
        agents.insert(
            agent_id.clone(),
            AgentInstance::new(agent_id.clone(), agent_type, task),
        );
        info!(agent_id = %agent_id, agent_type = %agent_type, "Agent started");
        Ok(agent_id)
    }

    /// Remove an agent from the registry. Returns `false` if it was not registered.
    pub async fn stop_agent(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().await.remove(agent_id).is_some();
        if removed {
            info!(agent_id = %agent_id, "Agent stopped");
        }
        removed
    }

    /// Snapshot of one agent, if registered.
    pub async fn get_agent_status(&self, agent_id: &str) -> Option<AgentInstance> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// All registered agents, ordered by id.
    pub async fn list_agents(&self) -> Vec<AgentInstance> {
        let agents = self.agents.read().await;
        let mut list: Vec<AgentInstance> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        list
    }

    /// Number of registered agents.
    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Bind an agent to a task and mark it running.
    ///
    /// Creates the agent if needed. An existing agent that is not currently
    /// running is rebound and keeps its memory; a running one is a collision.
    /// Returns a copy of the memory the task starts from.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        agent_type: &str,
        task: &str,
    ) -> CadenceResult<AgentMemory> {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(agent_id) {
            if existing.state == AgentState::Running {
                return Err(CadenceError::DuplicateAgent(agent_id.to_string()));
            }
            debug!(agent_id = %agent_id, previous = %existing.state, "Rebinding agent");
        }
        let agent = agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentInstance::new(agent_id, agent_type, task));
        agent.agent_type = agent_type.to_string();
        agent.task = task.to_string();
        agent.state = AgentState::Running;
        agent.started_at = Some(Utc::now());
        agent.completed_at = None;
        Ok(agent.memory.clone())
    }

    /// Record a finished task. `memory`, when given, replaces the stored memory.
    pub async fn finish(&self, agent_id: &str, success: bool, memory: Option<AgentMemory>) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(agent_id) {
            agent.state = if success {
                AgentState::Completed
            } else {
                AgentState::Failed
            };
            agent.completed_at = Some(Utc::now());
            if let Some(memory) = memory {
                agent.memory = memory;
            }
        }
    }

    /// Replace an agent's memory. Returns `false` if the agent is not registered.
    pub async fn set_memory(&self, agent_id: &str, memory: AgentMemory) -> bool {
        match self.agents.write().await.get_mut(agent_id) {
            Some(agent) => {
                agent.memory = memory;
                true
            }
            None => false,
        }
    }

    /// Copy of one agent's memory.
    pub async fn memory(&self, agent_id: &str) -> Option<AgentMemory> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|a| a.memory.clone())
    }

    /// Memory of every registered agent, keyed by id.
    pub async fn memory_snapshot(&self) -> BTreeMap<String, AgentMemory> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(id, agent)| (id.clone(), agent.memory.clone()))
            .collect()
    }

    /// Rebuild agents from a checkpoint.
    ///
    /// Each agent in `agent_memories` is replaced by a fresh idle instance
    /// carrying exactly the saved memory; any prior state is discarded.
    pub async fn rematerialize(&self, checkpoint: &WorkflowCheckpoint) -> usize {
        let mut agents = self.agents.write().await;
        for (agent_id, memory) in &checkpoint.agent_memories {
            let agent_type = checkpoint
                .completed_tasks
                .get(agent_id)
                .map_or("unknown", |r| r.agent_type.as_str());
            let mut agent = AgentInstance::new(agent_id.clone(), agent_type, "");
            agent.memory = memory.clone();
            agents.insert(agent_id.clone(), agent);
        }
        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            restored = checkpoint.agent_memories.len(),
            "Agents rematerialized"
        );
        checkpoint.agent_memories.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_agent_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("agent_{}", &uuid[..8])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{TaskResult, WorkflowResult};

    #[tokio::test]
    async fn test_start_agent_is_idle() {
        let registry = AgentRegistry::new();
        let id = registry
            .start_agent("coder", "implement auth", Some("coder-1".into()))
            .await
            .unwrap();
        assert_eq!(id, "coder-1");

        let agent = registry.get_agent_status(&id).await.unwrap();
        assert_eq!(agent.state, AgentState::Idle);
        assert_eq!(agent.agent_type, "coder");
        assert_eq!(agent.task, "implement auth");
        assert!(agent.memory.is_empty());
        assert!(agent.started_at.is_none());
    }

    #[tokio::test]
    async fn test_start_agent_synthesizes_id() {
        let registry = AgentRegistry::new();
        let a = registry.start_agent("coder", "x", None).await.unwrap();
        let b = registry.start_agent("coder", "y", None).await.unwrap();
        assert!(a.starts_with("agent_"));
        assert_ne!(a, b);
        assert_eq!(registry.agent_count().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected() {
        let registry = AgentRegistry::new();
        registry
            .start_agent("coder", "first", Some("dup".into()))
            .await
            .unwrap();
        let err = registry
            .start_agent("tester", "second", Some("dup".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::DuplicateAgent(ref id) if id == "dup"));

        // The original instance is untouched.
        let agent = registry.get_agent_status("dup").await.unwrap();
        assert_eq!(agent.task, "first");
    }

    #[tokio::test]
    async fn test_stop_agent() {
        let registry = AgentRegistry::new();
        registry
            .start_agent("coder", "x", Some("a".into()))
            .await
            .unwrap();
        assert!(registry.stop_agent("a").await);
        assert!(!registry.stop_agent("a").await);
        assert!(registry.get_agent_status("a").await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_and_finish() {
        let registry = AgentRegistry::new();
        let memory = registry.dispatch("a", "coder", "write").await.unwrap();
        assert!(memory.is_empty());

        let running = registry.get_agent_status("a").await.unwrap();
        assert_eq!(running.state, AgentState::Running);
        assert!(running.started_at.is_some());

        let mut updated = AgentMemory::new();
        updated.insert("files".into(), serde_json::json!(["lib.rs"]));
        registry.finish("a", true, Some(updated.clone())).await;

        let done = registry.get_agent_status("a").await.unwrap();
        assert_eq!(done.state, AgentState::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.memory, updated);
    }

    #[tokio::test]
    async fn test_finish_without_memory_keeps_previous() {
        let registry = AgentRegistry::new();
        registry.dispatch("a", "coder", "write").await.unwrap();
        let mut memory = AgentMemory::new();
        memory.insert("k".into(), serde_json::json!(1));
        assert!(registry.set_memory("a", memory.clone()).await);

        registry.finish("a", false, None).await;
        let agent = registry.get_agent_status("a").await.unwrap();
        assert_eq!(agent.state, AgentState::Failed);
        assert_eq!(agent.memory, memory);
    }

    #[tokio::test]
    async fn test_dispatch_running_agent_collides() {
        let registry = AgentRegistry::new();
        registry.dispatch("a", "coder", "first").await.unwrap();
        let err = registry.dispatch("a", "coder", "second").await.unwrap_err();
        assert!(matches!(err, CadenceError::DuplicateAgent(_)));
    }

    #[tokio::test]
    async fn test_dispatch_rebinds_idle_agent_with_memory() {
        let registry = AgentRegistry::new();
        registry
            .start_agent("coder", "old", Some("a".into()))
            .await
            .unwrap();
        let mut memory = AgentMemory::new();
        memory.insert("seen".into(), serde_json::json!(3));
        registry.set_memory("a", memory.clone()).await;

        let start = registry.dispatch("a", "reviewer", "new").await.unwrap();
        assert_eq!(start, memory);
        let agent = registry.get_agent_status("a").await.unwrap();
        assert_eq!(agent.task, "new");
        assert_eq!(agent.agent_type, "reviewer");
    }

    #[tokio::test]
    async fn test_memory_snapshot() {
        let registry = AgentRegistry::new();
        registry.dispatch("b", "coder", "x").await.unwrap();
        registry.dispatch("a", "coder", "y").await.unwrap();
        let mut memory = AgentMemory::new();
        memory.insert("n".into(), serde_json::json!(1));
        registry.set_memory("a", memory.clone()).await;

        let snapshot = registry.memory_snapshot().await;
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(snapshot["a"], memory);
        assert!(snapshot["b"].is_empty());
        assert_eq!(registry.memory("a").await, Some(memory));
        assert!(registry.memory("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_rematerialize_restores_memory_as_idle() {
        let registry = AgentRegistry::new();
        registry.dispatch("a", "coder", "stale").await.unwrap();

        let mut wf = WorkflowResult::new("wf", 1);
        wf.results.insert(
            "a".into(),
            TaskResult::completed("a", "coder", Utc::now(), serde_json::json!("ok")),
        );
        let mut memory = AgentMemory::new();
        memory.insert("context".into(), serde_json::json!({"files": 2}));
        let mut memories = BTreeMap::new();
        memories.insert("a".to_string(), memory.clone());
        memories.insert("orphan".to_string(), AgentMemory::new());
        let checkpoint = WorkflowCheckpoint::capture(&wf, 1, memories);

        assert_eq!(registry.rematerialize(&checkpoint).await, 2);

        let a = registry.get_agent_status("a").await.unwrap();
        assert_eq!(a.state, AgentState::Idle);
        assert_eq!(a.memory, memory);
        assert_eq!(a.agent_type, "coder");
        assert!(a.started_at.is_none());

        let orphan = registry.get_agent_status("orphan").await.unwrap();
        assert_eq!(orphan.agent_type, "unknown");
    }

    #[tokio::test]
    async fn test_list_agents_sorted() {
        let registry = AgentRegistry::new();
        for id in ["c", "a", "b"] {
            registry
                .start_agent("coder", "x", Some(id.into()))
                .await
                .unwrap();
        }
        let ids: Vec<String> = registry
            .list_agents()
            .await
            .into_iter()
            .map(|a| a.agent_id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
