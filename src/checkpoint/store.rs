//! Checkpoint persistence.
//!
//! Epistemic foundation:
//! - K_i: State is persisted atomically (write temp, then rename)
//! - B_i: Checkpoint file may not exist or may be unreadable → Option
//! - I^B: Crash during write → the rename boundary keeps the last good snapshot

use crate::checkpoint::CheckpointState;
use crate::models::{ErgonError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Durable store for the run's checkpoint snapshot.
///
/// Cloning is cheap; clones share the write lock, so overlapping saves from
/// spawned tasks are serialized.
#[derive(Clone)]
pub struct CheckpointStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    checkpoint_path: PathBuf,
    temp_path: PathBuf,
    /// Guards write+rename; holds the processed count of the last persisted
    /// snapshot so a late fire-and-forget save cannot roll the file back.
    write_lock: Mutex<usize>,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| ErgonError::io("creating checkpoint dir", e))?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                checkpoint_path: dir.join("checkpoint.json"),
                temp_path: dir.join("checkpoint.tmp.json"),
                write_lock: Mutex::new(0),
            }),
        })
    }

    /// Path of the canonical checkpoint file.
    pub fn path(&self) -> &Path {
        &self.inner.checkpoint_path
    }

    /// Read the durable snapshot.
    ///
    /// Absent, partial, or corrupt files all yield `None`; the run starts
    /// fresh rather than crashing.
    pub fn load(&self) -> Option<CheckpointState> {
        if !self.inner.checkpoint_path.exists() {
            info!("No checkpoint found, starting fresh");
            return None;
        }

        let content = match fs::read_to_string(&self.inner.checkpoint_path) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to read checkpoint, starting fresh");
                return None;
            }
        };

        match serde_json::from_str::<CheckpointState>(&content) {
            Ok(state) => {
                info!(
                    processed = state.metadata.processed_count,
                    failed = state.metadata.failed_ids.len(),
                    "Loaded checkpoint"
                );
                Some(state)
            }
            Err(e) => {
                error!(error = %e, "Checkpoint is not valid JSON, starting fresh");
                None
            }
        }
    }

    /// Persist the full state atomically.
    ///
    /// The serialized snapshot is written to a temp file and renamed over the
    /// canonical path, so a reader never observes a partial write. The lock
    /// covers write+rename only. Snapshots carrying fewer outcomes than the
    /// last persisted one are skipped: spawned saves may reach the lock out
    /// of order and must not undo newer progress.
    pub async fn save(&self, state: &CheckpointState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ErgonError::Internal(format!("Serializing checkpoint: {e}")))?;

        let mut last_saved = self.inner.write_lock.lock().await;
        if state.metadata.processed_count < *last_saved {
            debug!(
                processed = state.metadata.processed_count,
                last_saved = *last_saved,
                "Skipping stale snapshot"
            );
            return Ok(());
        }

        fs::write(&self.inner.temp_path, json)
            .map_err(|e| ErgonError::io("writing temp checkpoint", e))?;
        fs::rename(&self.inner.temp_path, &self.inner.checkpoint_path)
            .map_err(|e| ErgonError::io("renaming checkpoint", e))?;
        *last_saved = state.metadata.processed_count;

        debug!(
            processed = state.metadata.processed_count,
            "Checkpoint saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskOutcome};
    use tempfile::TempDir;

    fn sample_state() -> CheckpointState {
        let mut state = CheckpointState::new(2, "/tmp/input.csv");
        let task = Task {
            id: "1".to_string(),
            question: "what is 2+2".to_string(),
        };
        state.record(TaskOutcome::success(
            &task,
            "4".into(),
            Some("2+2=4".into()),
            42,
            1.5,
        ));
        state
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let state = sample_state();
        store.save(&state).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_returns_none_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        fs::write(store.path(), "{\"outcomes\": {").unwrap();
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn truncated_temp_file_never_corrupts_canonical() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let state = sample_state();
        store.save(&state).await.unwrap();

        // A crash mid-write leaves a partial temp file behind; the canonical
        // snapshot must still parse to the state that existed before.
        fs::write(dir.path().join("checkpoint.tmp.json"), "{\"outco").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn older_snapshot_cannot_roll_back_a_newer_one() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let older = sample_state();
        let mut newer = older.clone();
        let task = Task {
            id: "2".to_string(),
            question: "and 3+3".to_string(),
        };
        newer.record(TaskOutcome::success(&task, "6".into(), None, 7, 0.3));

        store.save(&newer).await.unwrap();
        // A periodic save spawned earlier in the run arrives late.
        store.save(&older).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, newer);
    }

    #[tokio::test]
    async fn later_save_replaces_earlier_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let mut state = sample_state();
        store.save(&state).await.unwrap();

        let task = Task {
            id: "2".to_string(),
            question: "and 3+3".to_string(),
        };
        state.record(TaskOutcome::failed(&task, "timeout".into()));
        store.save(&state).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.metadata.processed_count, 2);
        assert_eq!(loaded.metadata.failed_ids, vec!["2".to_string()]);
    }
}
