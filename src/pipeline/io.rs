//! Tabular input and output for batch runs.
//!
//! B_i: The input file exists, has `id` and `question` columns, and holds at
//! least one row. Anything else is a configuration-class error reported
//! before work begins.

use crate::checkpoint::CheckpointState;
use crate::models::{ErgonError, Result, Task, TaskStatus};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Load the task batch from a CSV file.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        ErgonError::InvalidInput(format!("opening input {}: {e}", path.display()))
    })?;

    let headers = reader
        .headers()
        .map_err(|e| ErgonError::ParseError(format!("reading CSV header: {e}")))?
        .clone();
    for required in ["id", "question"] {
        if !headers.iter().any(|h| h == required) {
            return Err(ErgonError::InvalidInput(format!(
                "input CSV must contain an '{required}' column"
            )));
        }
    }

    let mut tasks = Vec::new();
    for (row, record) in reader.deserialize::<Task>().enumerate() {
        let task =
            record.map_err(|e| ErgonError::ParseError(format!("Row {}: {e}", row + 1)))?;
        tasks.push(task);
    }

    if tasks.is_empty() {
        return Err(ErgonError::InvalidInput(
            "input contains no tasks".to_string(),
        ));
    }

    info!(count = tasks.len(), "Loaded tasks");
    Ok(tasks)
}

/// One output row per recorded outcome.
#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    id: &'a str,
    question: &'a str,
    answer: &'a str,
    reasoning: &'a str,
    status: TaskStatus,
    tokens: u64,
    error: &'a str,
}

/// Write all recorded outcomes as a CSV table.
pub fn write_outcomes(path: &Path, state: &CheckpointState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ErgonError::io("creating output dir", e))?;
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| ErgonError::InvalidInput(format!("creating output {}: {e}", path.display())))?;

    for outcome in state.outcomes.values() {
        let row = OutputRow {
            id: &outcome.id,
            question: &outcome.question,
            answer: outcome.answer.as_deref().unwrap_or(""),
            reasoning: outcome.reasoning.as_deref().unwrap_or(""),
            status: outcome.status,
            tokens: outcome.tokens,
            error: outcome.error.as_deref().unwrap_or(""),
        };
        writer
            .serialize(row)
            .map_err(|e| ErgonError::ParseError(format!("writing output row: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| ErgonError::io("flushing output", e))?;

    info!(path = %path.display(), rows = state.outcomes.len(), "Results written");
    Ok(())
}
