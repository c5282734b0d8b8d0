//! Storage trait definitions for SentinelOps
//!
//! `RunStore` is the one write path for run state. Implementations keep an
//! in-memory index of in-flight runs as a cache in front of the durable
//! history; the history is the source of truth.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{PipelineRun, RunId};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable, bounded, most-recent-first run history.
///
/// Guarantees:
/// - `insert` places the run at index 0 of `list`.
/// - History length never exceeds the store's cap; the oldest runs are evicted.
/// - In-memory state is updated before persistence is attempted, so reads
///   reflect a mutation even when the durable write fails.
/// - Runs in a non-terminal status are also reachable through `in_flight`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a newly created run at the head of the history.
    async fn insert(&self, run: PipelineRun) -> StorageResult<()>;

    /// Replace the stored copy of an existing run.
    ///
    /// A run already evicted from the history stays evicted; while it is in
    /// flight it remains reachable through `get`.
    async fn update(&self, run: PipelineRun) -> StorageResult<()>;

    /// Look up a run by ID, in-flight runs first.
    async fn get(&self, id: &RunId) -> StorageResult<Option<PipelineRun>>;

    /// Most recent runs first, at most `limit`.
    async fn list(&self, limit: usize) -> StorageResult<Vec<PipelineRun>>;

    /// The most recently created run.
    async fn latest(&self) -> StorageResult<Option<PipelineRun>>;

    /// IDs of runs that are queued or running.
    async fn in_flight(&self) -> StorageResult<Vec<RunId>>;
}
