use cadence_core::{CadenceError, CadenceResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory holding checkpoint files. Only created on first save.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// When false, `save_checkpoint` is a no-op returning an empty id.
    #[serde(default = "default_enable_checkpoints")]
    pub enable_checkpoints: bool,
    /// Upper bound on concurrently running tasks within a wave.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Timeout for tasks that do not carry their own.
    #[serde(default)]
    pub default_task_timeout_secs: Option<u64>,
    /// Keep only this many checkpoints per workflow, pruned after every save.
    #[serde(default)]
    pub checkpoint_retention: Option<usize>,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./data/checkpoints")
}

fn default_enable_checkpoints() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            enable_checkpoints: default_enable_checkpoints(),
            max_parallel: None,
            default_task_timeout_secs: None,
            checkpoint_retention: None,
        }
    }
}

impl OrchestratorConfig {
    /// Checkpoints enabled under `dir`.
    pub fn with_checkpoint_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Checkpointing turned off.
    pub fn without_checkpoints() -> Self {
        Self {
            enable_checkpoints: false,
            ..Self::default()
        }
    }

    /// Cap the number of tasks running at once.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    /// Keep only the newest `keep_latest` checkpoints per workflow.
    pub fn with_retention(mut self, keep_latest: usize) -> Self {
        self.checkpoint_retention = Some(keep_latest);
        self
    }

    /// Timeout applied to tasks that do not set their own.
    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_secs.map(Duration::from_secs)
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> CadenceResult<()> {
        if self.max_parallel == Some(0) {
            return Err(CadenceError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_retention == Some(0) {
            return Err(CadenceError::Config(
                "checkpoint_retention must keep at least 1 checkpoint".to_string(),
            ));
        }
        if self.default_task_timeout_secs == Some(0) {
            return Err(CadenceError::Config(
                "default_task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
