//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRunStore`, which satisfies the `RunStore` contract without
//! touching the filesystem.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::file_store::DEFAULT_HISTORY_CAP;
use crate::index::RunIndex;
use crate::schema::{PipelineRun, RunId};
use crate::storage_traits::{RunStore, StorageResult};

/// In-memory run store with the same bounded-history semantics as
/// [`JsonFileRunStore`](crate::JsonFileRunStore).
#[derive(Debug)]
pub struct MemoryRunStore {
    index: Mutex<RunIndex>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            index: Mutex::new(RunIndex::new(Vec::new(), cap)),
        }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert(&self, run: PipelineRun) -> StorageResult<()> {
        self.index.lock().unwrap().insert(run);
        Ok(())
    }

    async fn update(&self, run: PipelineRun) -> StorageResult<()> {
        self.index.lock().unwrap().update(run);
        Ok(())
    }

    async fn get(&self, id: &RunId) -> StorageResult<Option<PipelineRun>> {
        Ok(self.index.lock().unwrap().get(id).cloned())
    }

    async fn list(&self, limit: usize) -> StorageResult<Vec<PipelineRun>> {
        Ok(self.index.lock().unwrap().list(limit))
    }

    async fn latest(&self) -> StorageResult<Option<PipelineRun>> {
        Ok(self.index.lock().unwrap().latest().cloned())
    }

    async fn in_flight(&self) -> StorageResult<Vec<RunId>> {
        Ok(self.index.lock().unwrap().in_flight())
    }
}
