//! Worker pool for remote inference calls.
//!
//! Epistemic foundation:
//! - K_i: At most `max_concurrent` calls are in flight at any instant
//! - B_i: Each attempt may succeed or fail → Result per attempt
//! - I^B: Transient failures → bounded retry with a fixed delay
//!
//! The pool is polymorphic over [`CompletionClient`], so the retry and
//! admission logic never depends on which provider adapter is plugged in.

use crate::models::{Result, RuntimeConfig, Task, TaskOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Raw response from a single completion attempt.
#[derive(Debug, Clone)]
pub struct CallResponse {
    /// Full generated content, markers included
    pub content: String,

    /// Model that produced the response
    pub model: String,

    /// Total tokens reported by the provider
    pub total_tokens: u64,
}

/// One remote call, one attempt. Retry belongs to the pool, not the adapter.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, task: &Task) -> Result<CallResponse>;
}

/// Split raw content into user-facing answer and optional reasoning.
///
/// The four cases around `<think>`/`</think>` markers:
/// close tag present → reasoning is everything before it (minus the open tag
/// when present), answer is everything after; open tag only → reasoning is
/// everything after it and the answer is empty; neither → the whole content
/// is the answer. Malformed or nested markers get no special treatment.
pub fn split_reasoning(content: &str) -> (String, Option<String>) {
    if let Some((before, after)) = content.split_once("</think>") {
        let reasoning = match before.split_once("<think>") {
            Some((_, span)) => span.trim().to_string(),
            None => before.trim().to_string(),
        };
        (after.trim().to_string(), Some(reasoning))
    } else if let Some((_, after)) = content.split_once("<think>") {
        (String::new(), Some(after.trim().to_string()))
    } else {
        (content.to_string(), None)
    }
}

/// Bounded-concurrency invoker with per-task retry.
pub struct WorkerPool {
    client: Arc<dyn CompletionClient>,
    semaphore: Arc<Semaphore>,
    retry_times: u32,
    retry_delay: Duration,
}

impl WorkerPool {
    /// Create a pool over the given adapter and runtime limits.
    pub fn new(client: Arc<dyn CompletionClient>, runtime: &RuntimeConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(runtime.max_concurrent)),
            retry_times: runtime.retry_times,
            retry_delay: Duration::from_secs_f64(runtime.retry_delay_secs),
        }
    }

    /// Process one task to a terminal outcome.
    ///
    /// Makes up to `retry_times + 1` attempts. The capacity permit is held
    /// only across the in-flight call; every attempt, retries included, goes
    /// through the same admission gate.
    pub async fn invoke(&self, task: Task) -> TaskOutcome {
        let total_attempts = self.retry_times + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            let permit = match self.semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => {
                    return TaskOutcome::failed(&task, "worker pool shut down".to_string());
                }
            };

            debug!(id = %task.id, attempt, "Dispatching call");
            let start = Instant::now();
            let result = self.client.complete(&task).await;
            drop(permit);

            match result {
                Ok(response) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    let (answer, reasoning) = split_reasoning(&response.content);
                    debug!(
                        id = %task.id,
                        attempt,
                        tokens = response.total_tokens,
                        model = %response.model,
                        "Call succeeded"
                    );
                    return TaskOutcome::success(
                        &task,
                        answer,
                        reasoning,
                        response.total_tokens,
                        elapsed,
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < total_attempts {
                        error!(
                            id = %task.id,
                            attempt,
                            total_attempts,
                            error = %last_error,
                            "Call failed, retrying"
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    } else {
                        error!(id = %task.id, error = %last_error, "All attempts failed");
                    }
                }
            }
        }

        TaskOutcome::failed(&task, last_error)
    }
}
