//! kbsync Sync - Runs connector syncs from listing to index.
//!
//! This crate provides:
//! - The embedding gate (batching, retries, dimension checks)
//! - The index writer (supersede or remove a file's entries)
//! - The sync orchestrator and its per-run state machine
//! - A job runner with one in-flight job per connector
//! - Periodic and watcher-driven triggers

mod error;
mod gate;
mod jobs;
mod orchestrator;
mod scheduler;
mod writer;

#[cfg(test)]
mod testing;

pub use error::{SyncError, SyncResult};
pub use gate::{EmbeddingGate, GateConfig};
pub use jobs::{JobId, JobRunner, JobSnapshot, Submission};
pub use orchestrator::{run_succeeded, Orchestrator, RunSettings};
pub use scheduler::{run_watch_triggers, Scheduler};
pub use writer::IndexWriter;
