//! Sentinel-State: run records and durable run history for SentinelOps
//!
//! This crate is the persistence layer of the security gate. It owns the
//! shape of a pipeline run and keeps a bounded, most-recent-first history of
//! runs on disk.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record shape, state-transition integrity, durable history.
//!
//! ## Key Components
//!
//! - `PipelineRun` / `StageRecord`: the run record and its six fixed stages
//! - `RunStore`: the single write path for run state
//! - `JsonFileRunStore`: bounded JSON history file with an in-flight cache

mod error;
pub mod fakes;
pub mod file_store;
mod index;
pub mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use file_store::{JsonFileRunStore, DEFAULT_HISTORY_CAP};
pub use schema::{
    PipelineRun, PipelineStatus, RunId, StageKey, StageRecord, StageStatus, Stages,
    VulnerabilitySummary,
};
pub use storage_traits::{RunStore, StorageResult};
