//! Checkpoint state for a batch run.
//!
//! Epistemic foundation:
//! - K_i: The checkpoint tracks every outcome recorded so far
//! - K_i: `processed_count` always equals the number of outcomes
//! - B_i: A checkpoint may belong to a different input file → source identity

use crate::models::{RunStats, TaskOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run metadata persisted alongside the outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Tasks in the input batch
    pub total_count: usize,

    /// Outcomes recorded so far
    pub processed_count: usize,

    /// Sum of reported token counts
    pub total_tokens: u64,

    /// Ids of terminally failed tasks
    pub failed_ids: Vec<String>,

    /// Most recently recorded id
    pub last_id: Option<String>,

    /// When the run was first started
    pub started_at: DateTime<Utc>,

    /// Canonical path of the input batch this checkpoint was computed from.
    /// A mismatch against the current input marks the checkpoint stale.
    pub input_file: String,
}

/// Snapshot of all task outcomes seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Outcomes keyed by task id
    pub outcomes: HashMap<String, TaskOutcome>,

    /// Run metadata
    pub metadata: RunMetadata,
}

impl CheckpointState {
    /// Create an empty state bound to the given input.
    pub fn new(total_count: usize, input_file: &str) -> Self {
        Self {
            outcomes: HashMap::new(),
            metadata: RunMetadata {
                total_count,
                processed_count: 0,
                total_tokens: 0,
                failed_ids: Vec::new(),
                last_id: None,
                started_at: Utc::now(),
                input_file: input_file.to_string(),
            },
        }
    }

    /// Merge one outcome: map entry and all counters move as one unit.
    pub fn record(&mut self, outcome: TaskOutcome) {
        let id = outcome.id.clone();
        let tokens = outcome.tokens;
        let failed = outcome.is_failed();

        if self.outcomes.insert(id.clone(), outcome).is_none() {
            self.metadata.processed_count += 1;
        }
        self.metadata.total_tokens += tokens;
        if failed && !self.metadata.failed_ids.contains(&id) {
            self.metadata.failed_ids.push(id.clone());
        }
        self.metadata.last_id = Some(id);
    }

    /// Whether every task in the batch has an outcome.
    pub fn is_complete(&self) -> bool {
        self.metadata.processed_count >= self.metadata.total_count
    }

    /// Convert to RunStats.
    pub fn to_run_stats(&self, runtime_secs: f64) -> RunStats {
        let failed = self.metadata.failed_ids.len();
        let mut stats = RunStats {
            total_tasks: self.metadata.total_count,
            processed: self.metadata.processed_count,
            succeeded: self.metadata.processed_count.saturating_sub(failed),
            failed,
            total_tokens: self.metadata.total_tokens,
            runtime_secs,
            ..Default::default()
        };
        stats.finalize();
        stats
    }
}
