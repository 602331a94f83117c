//! Task and outcome types for ergon.
//!
//! K_i: These types represent the core data flow through the batch run.

use serde::{Deserialize, Serialize};

/// One unit of remote-inference work.
///
/// K_i: Every task has a unique id and a question. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the batch
    pub id: String,

    /// The prompt text sent to the model
    pub question: String,
}

/// Terminal status of a processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The remote call eventually succeeded
    Success,
    /// All attempts failed; the last error is recorded
    Failed,
}

/// Recorded result of processing one task.
///
/// K_i: Created exactly once per task id. Retries overwrite the same
/// logical outcome, never create duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task id
    pub id: String,

    /// Original prompt text
    pub question: String,

    /// Model answer (present on success, may be empty)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Reasoning segment extracted from the response, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Terminal status
    pub status: TaskStatus,

    /// Last error message (failed outcomes only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Total tokens reported by the provider
    #[serde(default)]
    pub tokens: u64,

    /// Wall time of the successful attempt, in seconds
    #[serde(default)]
    pub elapsed_secs: f64,
}

impl TaskOutcome {
    /// Build a successful outcome.
    pub fn success(
        task: &Task,
        answer: String,
        reasoning: Option<String>,
        tokens: u64,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            id: task.id.clone(),
            question: task.question.clone(),
            answer: Some(answer),
            reasoning,
            status: TaskStatus::Success,
            error: None,
            tokens,
            elapsed_secs,
        }
    }

    /// Build a terminal failure outcome carrying the last error seen.
    pub fn failed(task: &Task, error: String) -> Self {
        Self {
            id: task.id.clone(),
            question: task.question.clone(),
            answer: None,
            reasoning: None,
            status: TaskStatus::Failed,
            error: Some(error),
            tokens: 0,
            elapsed_secs: 0.0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// Statistics for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Tasks in the input batch
    pub total_tasks: usize,

    /// Outcomes recorded (this run plus resumed)
    pub processed: usize,

    /// Successful outcomes
    pub succeeded: usize,

    /// Terminally failed outcomes
    pub failed: usize,

    /// Sum of reported token counts
    pub total_tokens: u64,

    /// Wall time of this run in seconds
    pub runtime_secs: f64,

    /// Outcomes per hour
    pub throughput_per_hour: f64,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.processed as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn failed_outcome_keeps_error_and_drops_answer() {
        let task = Task {
            id: "7".to_string(),
            question: "q".to_string(),
        };
        let outcome = TaskOutcome::failed(&task, "connection reset".to_string());
        assert!(outcome.is_failed());
        assert_eq!(outcome.error.as_deref(), Some("connection reset"));
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.tokens, 0);
    }
}
