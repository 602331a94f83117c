//! Checkpoint module for resumable batch runs.
//!
//! Provides:
//! - `CheckpointState`: outcomes and run metadata
//! - `CheckpointStore`: atomic persistence and loading

mod state;
mod store;

pub use state::*;
pub use store::*;
