use crate::types::WorkflowCheckpoint;
use cadence_core::{CadenceError, CadenceResult};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A checkpoint file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// File stem, `{workflow_id}_wave{wave_id}`.
    pub checkpoint_id: String,
    /// Wave number parsed from the file name.
    pub wave_id: u32,
    /// Full path of the file.
    pub path: PathBuf,
    /// File modification time; only used to order entries with equal `wave_id`.
    pub modified: Option<SystemTime>,
}

/// JSON file store for workflow checkpoints, one `{checkpoint_id}.json` per snapshot.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// final name, so readers only ever see complete checkpoints.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// The directory is created lazily on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.dir.join(format!("{checkpoint_id}.json"))
    }

    /// Durably write a checkpoint, replacing any previous file with the same id.
    pub async fn save(&self, checkpoint: &WorkflowCheckpoint) -> CadenceResult<PathBuf> {
        validate_id(&checkpoint.workflow_id, "workflow id")?;
        validate_id(&checkpoint.checkpoint_id, "checkpoint id")?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.checkpoint_path(&checkpoint.checkpoint_id);
        let tmp_path = path.with_extension("json.tmp");
        let mut buf = serde_json::to_vec_pretty(checkpoint)?;
        buf.push(b'\n');

        if let Err(e) = write_synced(&tmp_path, &buf).await {
            discard_temp(&tmp_path).await;
            return Err(CadenceError::Checkpoint(format!(
                "Failed to write {}: {e}",
                tmp_path.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            discard_temp(&tmp_path).await;
            return Err(CadenceError::Checkpoint(format!(
                "Failed to move checkpoint into place at {}: {e}",
                path.display()
            )));
        }

        debug!(path = %path.display(), bytes = buf.len(), "Checkpoint written");
        Ok(path)
    }

    /// Read a checkpoint by id. A missing file is [`CadenceError::CheckpointNotFound`].
    pub async fn load(&self, checkpoint_id: &str) -> CadenceResult<WorkflowCheckpoint> {
        validate_id(checkpoint_id, "checkpoint id")?;
        let path = self.checkpoint_path(checkpoint_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CadenceError::CheckpointNotFound(checkpoint_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|e| {
            CadenceError::Checkpoint(format!("Failed to parse checkpoint {checkpoint_id}: {e}"))
        })
    }

    /// Checkpoints of one workflow, oldest first.
    pub async fn list(&self, workflow_id: &str) -> CadenceResult<Vec<CheckpointEntry>> {
        validate_id(workflow_id, "workflow id")?;
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{workflow_id}_wave");
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some(wave_id) = stem.strip_prefix(&prefix).and_then(parse_wave) else {
                continue;
            };
            let modified = entry.metadata().await.ok().and_then(|m| m.modified().ok());
            entries.push(CheckpointEntry {
                checkpoint_id: stem.to_string(),
                wave_id,
                path,
                modified,
            });
        }

        entries.sort_by(|a, b| (a.wave_id, a.modified).cmp(&(b.wave_id, b.modified)));
        Ok(entries)
    }

    /// The checkpoint with the highest wave number, if any.
    pub async fn latest(&self, workflow_id: &str) -> CadenceResult<Option<WorkflowCheckpoint>> {
        match self.list(workflow_id).await?.last() {
            Some(entry) => self.load(&entry.checkpoint_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Delete all but the `keep_latest` most recent checkpoints of a workflow.
    /// Returns how many files were removed.
    pub async fn cleanup(&self, workflow_id: &str, keep_latest: usize) -> CadenceResult<usize> {
        let entries = self.list(workflow_id).await?;
        let excess = entries.len().saturating_sub(keep_latest);

        for entry in entries.iter().take(excess) {
            tokio::fs::remove_file(&entry.path).await?;
            debug!(checkpoint_id = %entry.checkpoint_id, "Checkpoint removed");
        }

        if excess > 0 {
            info!(
                workflow_id = %workflow_id,
                removed = excess,
                kept = entries.len() - excess,
                "Old checkpoints cleaned up"
            );
        }
        Ok(excess)
    }
}

/// Reject ids that would resolve outside the checkpoint directory.
pub fn validate_id(id: &str, kind: &str) -> CadenceResult<()> {
    let unsafe_id = id.is_empty()
        || id.contains("..")
        || id.chars().any(|c| c == '/' || c == '\\' || c == '\0');
    if unsafe_id {
        return Err(CadenceError::Checkpoint(format!(
            "Invalid {kind} '{id}': must be non-empty without path separators or '..'"
        )));
    }
    Ok(())
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove temporary checkpoint");
        }
    }
}

fn parse_wave(suffix: &str) -> Option<u32> {
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentMemory, TaskResult, WorkflowResult};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn checkpoint(workflow_id: &str, wave_id: u32) -> WorkflowCheckpoint {
        let mut wf = WorkflowResult::new(workflow_id, 4);
        wf.steps_completed = wave_id as usize;
        wf.results.insert(
            "a".into(),
            TaskResult::completed("a", "coder", Utc::now(), serde_json::json!({"ok": true})),
        );
        let mut memory = AgentMemory::new();
        memory.insert("wave".into(), serde_json::json!(wave_id));
        let mut memories = BTreeMap::new();
        memories.insert("a".to_string(), memory);
        WorkflowCheckpoint::capture(&wf, wave_id, memories)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let cp = checkpoint("wf", 1);
        let path = store.save(&cp).await.unwrap();
        assert!(path.ends_with("wf_wave1.json"));

        let loaded = store.load("wf_wave1").await.unwrap();
        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&checkpoint("wf", 1)).await.unwrap();
        store.save(&checkpoint("wf", 2)).await.unwrap();

        assert_eq!(file_names(dir.path()), ["wf_wave1.json", "wf_wave2.json"]);
    }

    #[tokio::test]
    async fn test_directory_created_on_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("checkpoints");
        let store = CheckpointStore::new(&nested);
        assert!(!nested.exists());
        store.save(&checkpoint("wf", 1)).await.unwrap();
        assert!(nested.join("wf_wave1.json").exists());
    }

    #[tokio::test]
    async fn test_same_id_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.save(&checkpoint("wf", 1)).await.unwrap();
        let newer = checkpoint("wf", 1).with_metadata("attempt", serde_json::json!(2));
        store.save(&newer).await.unwrap();

        let loaded = store.load("wf_wave1").await.unwrap();
        assert_eq!(loaded.metadata["attempt"], 2);
        assert_eq!(store.list("wf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let err = store.load("nope_wave1").await.unwrap_err();
        assert!(matches!(err, CadenceError::CheckpointNotFound(ref id) if id == "nope_wave1"));
    }

    #[tokio::test]
    async fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wf_wave1.json"), "{ truncated").unwrap();
        let store = CheckpointStore::new(dir.path());
        let err = store.load("wf_wave1").await.unwrap_err();
        assert!(matches!(err, CadenceError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        // A directory squatting on the final name makes the rename fail.
        std::fs::create_dir(dir.path().join("wf_wave1.json")).unwrap();
        std::fs::write(dir.path().join("wf_wave1.json").join("keep"), "x").unwrap();

        let err = store.save(&checkpoint("wf", 1)).await.unwrap_err();
        assert!(matches!(err, CadenceError::Checkpoint(_)));
        assert!(!dir.path().join("wf_wave1.json.tmp").exists());
        assert!(dir.path().join("wf_wave1.json").join("keep").exists());
    }

    #[tokio::test]
    async fn test_list_orders_by_wave_number() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        for wave in [10, 2, 1] {
            store.save(&checkpoint("wf", wave)).await.unwrap();
        }
        store.save(&checkpoint("other", 5)).await.unwrap();
        std::fs::write(dir.path().join("wf_wavex.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let waves: Vec<u32> = store
            .list("wf")
            .await
            .unwrap()
            .iter()
            .map(|e| e.wave_id)
            .collect();
        assert_eq!(waves, [1, 2, 10]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent"));
        assert!(store.list("wf").await.unwrap().is_empty());
        assert!(store.latest("wf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&checkpoint("wf", 1)).await.unwrap();
        store.save(&checkpoint("wf", 3)).await.unwrap();
        let latest = store.latest("wf").await.unwrap().unwrap();
        assert_eq!(latest.wave_id, 3);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        for wave in 1..=5 {
            store.save(&checkpoint("wf", wave)).await.unwrap();
        }
        store.save(&checkpoint("other", 1)).await.unwrap();

        assert_eq!(store.cleanup("wf", 2).await.unwrap(), 3);
        let remaining: Vec<u32> = store
            .list("wf")
            .await
            .unwrap()
            .iter()
            .map(|e| e.wave_id)
            .collect();
        assert_eq!(remaining, [4, 5]);
        // Retention is per workflow.
        assert_eq!(store.list("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keep_more_than_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&checkpoint("wf", 1)).await.unwrap();
        store.save(&checkpoint("wf", 2)).await.unwrap();

        assert_eq!(store.cleanup("wf", 2).await.unwrap(), 0);
        assert_eq!(store.cleanup("wf", 10).await.unwrap(), 0);
        assert_eq!(store.list("wf").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_null_output_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut wf = WorkflowResult::new("wf", 1);
        wf.results.insert(
            "quiet".into(),
            TaskResult::completed("quiet", "noop", Utc::now(), serde_json::Value::Null),
        );
        let cp = WorkflowCheckpoint::capture(&wf, 1, BTreeMap::new());
        store.save(&cp).await.unwrap();

        let loaded = store.load("wf_wave1").await.unwrap();
        assert_eq!(loaded.completed_tasks["quiet"].output, Some(serde_json::Value::Null));
        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn test_ids_cannot_leave_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(root.path().join("checkpoints"));

        let err = store.save(&checkpoint("../escaped", 1)).await.unwrap_err();
        assert!(matches!(err, CadenceError::Checkpoint(_)));
        assert!(!root.path().join("escaped_wave1.json").exists());
        assert!(!root.path().join("checkpoints").exists());

        std::fs::write(root.path().join("outside.json"), "{}").unwrap();
        for id in ["../outside", "nested/wf_wave1", "..\\outside", ""] {
            let err = store.load(id).await.unwrap_err();
            assert!(matches!(err, CadenceError::Checkpoint(_)), "{id}: {err}");
        }
        assert!(store.list("../escaped").await.is_err());
        assert!(store.cleanup("a/b", 0).await.is_err());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("workflow_1a2b3c4d", "workflow id").is_ok());
        assert!(validate_id("release-2024.10_wave3", "checkpoint id").is_ok());
        assert!(validate_id("..", "workflow id").is_err());
        assert!(validate_id("a/b", "workflow id").is_err());
        assert!(validate_id("a\\b", "workflow id").is_err());
        assert!(validate_id("", "workflow id").is_err());
    }

    #[test]
    fn test_parse_wave() {
        assert_eq!(parse_wave("12"), Some(12));
        assert_eq!(parse_wave(""), None);
        assert_eq!(parse_wave("+1"), None);
        assert_eq!(parse_wave("1_x"), None);
    }
}
