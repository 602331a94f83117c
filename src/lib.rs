//! ergon - resumable batch inference for OpenAI-compatible endpoints.
//!
//! ## Architecture
//!
//! - **Worker Pool**: bounded-concurrency invoker with per-task retry
//! - **Checkpoint Store**: atomic snapshots enabling crash-safe resumption
//! - **Batch Runner**: reconciles input against the checkpoint, dispatches
//!   the remainder, merges outcomes, emits CSV output
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff)

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use client::{ChatClient, RateLimiter};
pub use models::{Config, ErgonError, Result, RunStats, Task, TaskOutcome, TaskStatus};
pub use pipeline::{load_tasks, BatchRunner};
pub use pool::{CallResponse, CompletionClient, WorkerPool};
