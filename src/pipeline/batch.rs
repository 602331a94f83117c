//! Batch coordinator.
//!
//! Pipeline flow:
//! Tasks → reconcile against checkpoint → worker pool → merge outcomes →
//! periodic checkpoint saves → final save → CSV output + stats
//!
//! Epistemic foundation:
//! - K_i: Completed ids are never re-dispatched
//! - K_i: The drain loop is the only writer of shared state
//! - B_i: A checkpoint on disk may belong to a different input → discard
//! - I^B: Crash between saves → at most the unsaved tail is redone

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::models::{Result, RunStats, RuntimeConfig, Task};
use crate::pipeline::write_outcomes;
use crate::pool::WorkerPool;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Coordinates a full batch run against the worker pool and checkpoint store.
pub struct BatchRunner {
    pool: Arc<WorkerPool>,
    store: CheckpointStore,
    save_interval: usize,
}

impl BatchRunner {
    pub fn new(pool: Arc<WorkerPool>, store: CheckpointStore, runtime: &RuntimeConfig) -> Self {
        Self {
            pool,
            store,
            save_interval: runtime.save_interval,
        }
    }

    /// Reconcile the batch against any existing checkpoint.
    ///
    /// A checkpoint recorded from a different input file is stale: it is
    /// discarded (not erased) and the run starts from empty state.
    fn reconcile(&self, total: usize, source: &str) -> CheckpointState {
        match self.store.load() {
            Some(state) if state.metadata.input_file != source => {
                warn!(
                    checkpoint_input = %state.metadata.input_file,
                    current_input = %source,
                    "Checkpoint belongs to a different input, starting fresh"
                );
                CheckpointState::new(total, source)
            }
            Some(mut state) => {
                state.metadata.total_count = total;
                info!(
                    already_done = state.metadata.processed_count,
                    "Resuming from checkpoint"
                );
                state
            }
            None => CheckpointState::new(total, source),
        }
    }

    /// Run the batch to completion (or interruption).
    ///
    /// `source` is the canonical identity of the input batch, stored into the
    /// checkpoint so later runs can detect a mismatched input.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        source: &str,
        output_path: &Path,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let total = tasks.len();

        let mut state = self.reconcile(total, source);

        let pending: Vec<Task> = tasks
            .into_iter()
            .filter(|t| !state.outcomes.contains_key(&t.id))
            .collect();

        if pending.is_empty() {
            info!("All tasks already processed, nothing to do");
        } else {
            let already_done = state.metadata.processed_count;
            info!(
                total,
                pending = pending.len(),
                already_done,
                "Dispatching batch"
            );

            let mut join_set = JoinSet::new();
            for task in pending {
                let pool = Arc::clone(&self.pool);
                join_set.spawn(async move { pool.invoke(task).await });
            }

            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                    .unwrap()
                    .progress_chars("##-"),
            );
            pb.set_position(already_done as u64);

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            // Outcomes arrive in completion order; this loop is the single
            // mutual-exclusion boundary for the in-memory state.
            loop {
                tokio::select! {
                    joined = join_set.join_next() => {
                        let Some(joined) = joined else { break };
                        match joined {
                            Ok(outcome) => {
                                state.record(outcome);
                                if state.metadata.processed_count % self.save_interval == 0 {
                                    self.spawn_save(&state);
                                }
                                pb.set_position(state.metadata.processed_count as u64);
                                pb.set_message(format!(
                                    "failed: {}",
                                    state.metadata.failed_ids.len()
                                ));
                            }
                            Err(e) => error!(error = %e, "Worker task panicked"),
                        }
                    }
                    _ = &mut ctrl_c => {
                        warn!("Interrupted, saving checkpoint before exit");
                        break;
                    }
                }
            }

            pb.finish_with_message(format!(
                "done: {}, failed: {}",
                state.metadata.processed_count,
                state.metadata.failed_ids.len()
            ));
        }

        // A failed save costs resumability, not this run's results.
        if let Err(e) = self.store.save(&state).await {
            error!(error = %e, "Final checkpoint save failed");
        }

        write_outcomes(output_path, &state)?;

        let stats = state.to_run_stats(start.elapsed().as_secs_f64());
        info!(
            total = stats.total_tasks,
            succeeded = stats.succeeded,
            failed = stats.failed,
            total_tokens = stats.total_tokens,
            runtime_secs = format!("{:.2}", stats.runtime_secs),
            "Batch complete"
        );

        Ok(stats)
    }

    /// Fire-and-forget save of a snapshot; overlapping saves are serialized
    /// by the store's lock, and a failure never stalls the drain loop.
    fn spawn_save(&self, state: &CheckpointState) {
        let store = self.store.clone();
        let snapshot = state.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                error!(error = %e, "Checkpoint save failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErgonError, TaskOutcome};
    use crate::pool::{CallResponse, CompletionClient};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn tasks(ids: &[&str]) -> Vec<Task> {
        ids.iter()
            .map(|id| Task {
                id: id.to_string(),
                question: format!("question {id}"),
            })
            .collect()
    }

    fn runtime(retry_times: u32) -> RuntimeConfig {
        RuntimeConfig {
            max_concurrent: 2,
            retry_times,
            retry_delay_secs: 0.0,
            save_interval: 2,
        }
    }

    /// Scripted adapter: per-id failure budgets, call counts per id.
    struct ScriptedClient {
        // id → remaining failures before success
        failures: DashMap<String, u32>,
        calls: DashMap<String, u32>,
        total_calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(failures: &[(&str, u32)]) -> Self {
            let map = DashMap::new();
            for (id, n) in failures {
                map.insert(id.to_string(), *n);
            }
            Self {
                failures: map,
                calls: DashMap::new(),
                total_calls: AtomicU32::new(0),
            }
        }

        fn calls_for(&self, id: &str) -> u32 {
            self.calls.get(id).map(|c| *c).unwrap_or(0)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, task: &Task) -> crate::models::Result<CallResponse> {
            *self.calls.entry(task.id.clone()).or_insert(0) += 1;
            self.total_calls.fetch_add(1, Ordering::SeqCst);

            if let Some(mut remaining) = self.failures.get_mut(&task.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ErgonError::Api {
                        status: 503,
                        message: format!("unavailable for {}", task.id),
                    });
                }
            }
            Ok(CallResponse {
                content: format!("<think>thinking about {id}</think>answer {id}", id = task.id),
                model: "mock".to_string(),
                total_tokens: 10,
            })
        }
    }

    fn runner(client: Arc<ScriptedClient>, dir: &TempDir, retry_times: u32) -> BatchRunner {
        let rt = runtime(retry_times);
        let pool = Arc::new(WorkerPool::new(client, &rt));
        let store = CheckpointStore::new(&dir.path().join("checkpoints")).unwrap();
        BatchRunner::new(pool, store, &rt)
    }

    #[tokio::test]
    async fn transient_failures_recover_within_retry_budget() {
        let dir = TempDir::new().unwrap();
        // Task 2 fails twice, then succeeds on the third attempt.
        let client = Arc::new(ScriptedClient::new(&[("2", 2)]));
        let runner = runner(Arc::clone(&client), &dir, 2);

        let stats = runner
            .run(tasks(&["1", "2", "3"]), "input-a", &dir.path().join("out.csv"))
            .await
            .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(client.calls_for("2"), 3);
        assert_eq!(client.calls_for("1"), 1);

        let state = runner.store.load().unwrap();
        assert!(state.metadata.failed_ids.is_empty());
        assert_eq!(state.metadata.processed_count, 3);
        assert_eq!(
            state.outcomes["2"].answer.as_deref(),
            Some("answer 2")
        );
        assert_eq!(
            state.outcomes["2"].reasoning.as_deref(),
            Some("thinking about 2")
        );
    }

    #[tokio::test]
    async fn exhausted_retries_yield_terminal_failure_without_aborting_batch() {
        let dir = TempDir::new().unwrap();
        // Task 2 always fails; retry budget of 1 → two attempts.
        let client = Arc::new(ScriptedClient::new(&[("2", u32::MAX)]));
        let runner = runner(Arc::clone(&client), &dir, 1);

        let stats = runner
            .run(tasks(&["1", "2", "3"]), "input-a", &dir.path().join("out.csv"))
            .await
            .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(client.calls_for("2"), 2);

        let state = runner.store.load().unwrap();
        assert_eq!(state.metadata.failed_ids, vec!["2".to_string()]);
        let failed = &state.outcomes["2"];
        assert!(failed.error.as_deref().unwrap().contains("unavailable for 2"));
        assert!(failed.answer.is_none());
    }

    #[tokio::test]
    async fn resume_skips_completed_tasks_and_keeps_their_outcomes() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(&[]));
        let runner = runner(Arc::clone(&client), &dir, 0);

        // Seed a checkpoint holding a completed outcome for task 1.
        let mut seeded = CheckpointState::new(3, "input-a");
        let done = Task {
            id: "1".to_string(),
            question: "question 1".to_string(),
        };
        seeded.record(TaskOutcome::success(
            &done,
            "cached answer".into(),
            None,
            5,
            0.1,
        ));
        runner.store.save(&seeded).await.unwrap();

        let stats = runner
            .run(tasks(&["1", "2", "3"]), "input-a", &dir.path().join("out.csv"))
            .await
            .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(client.calls_for("1"), 0);
        assert_eq!(client.calls_for("2"), 1);
        assert_eq!(client.calls_for("3"), 1);

        let state = runner.store.load().unwrap();
        assert_eq!(
            state.outcomes["1"].answer.as_deref(),
            Some("cached answer")
        );
    }

    #[tokio::test]
    async fn checkpoint_for_other_input_is_discarded() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(&[]));
        let runner = runner(Arc::clone(&client), &dir, 0);

        let mut stale = CheckpointState::new(3, "input-a");
        let done = Task {
            id: "1".to_string(),
            question: "question 1".to_string(),
        };
        stale.record(TaskOutcome::success(&done, "old".into(), None, 5, 0.1));
        runner.store.save(&stale).await.unwrap();

        let stats = runner
            .run(tasks(&["1", "2", "3"]), "input-b", &dir.path().join("out.csv"))
            .await
            .unwrap();

        // All three dispatched: nothing was pre-completed for this input.
        assert_eq!(client.calls_for("1"), 1);
        assert_eq!(stats.processed, 3);

        let state = runner.store.load().unwrap();
        assert_eq!(state.metadata.input_file, "input-b");
        assert_eq!(state.outcomes["1"].answer.as_deref(), Some("answer 1"));
    }

    #[tokio::test]
    async fn rerun_after_completion_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new(&[]));
        let runner = runner(Arc::clone(&client), &dir, 0);
        let output = dir.path().join("out.csv");

        runner
            .run(tasks(&["1", "2"]), "input-a", &output)
            .await
            .unwrap();
        let calls_after_first = client.total_calls.load(Ordering::SeqCst);

        let stats = runner
            .run(tasks(&["1", "2"]), "input-a", &output)
            .await
            .unwrap();

        assert_eq!(client.total_calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(stats.processed, 2);
        assert!(output.exists());
    }
}
