//! JSON-file backed run history.
//!
//! Layout on disk:
//!
//! ```json
//! { "pipelines": [ <most recent run>, ... ], "updated_at": "<rfc3339>" }
//! ```
//!
//! Every mutation re-serializes the full bounded list. Writes are serialized
//! through one async mutex that is held across the write, and each write
//! lands in a temporary file that is renamed over the history file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::index::RunIndex;
use crate::schema::{PipelineRun, RunId};
use crate::storage_traits::{RunStore, StorageResult};

/// Number of runs kept in the history file.
pub const DEFAULT_HISTORY_CAP: usize = 50;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    pipelines: Vec<PipelineRun>,
    updated_at: DateTime<Utc>,
}

/// Run store persisted as a single JSON history file.
#[derive(Debug)]
pub struct JsonFileRunStore {
    path: PathBuf,
    index: Mutex<RunIndex>,
}

impl JsonFileRunStore {
    /// Open (or lazily create) the history file at `path` with the default cap.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::open_with_cap(path, DEFAULT_HISTORY_CAP)
    }

    /// Open with an explicit history cap.
    ///
    /// A missing file starts an empty history. An unreadable or malformed file
    /// also starts empty; the problem is logged and the file is replaced on
    /// the next write.
    pub fn open_with_cap(path: impl AsRef<Path>, cap: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let history = load_history(&path);
        debug!(path = %path.display(), runs = history.len(), "Loaded run history");
        Self {
            path,
            index: Mutex::new(RunIndex::new(history, cap)),
        }
    }

    /// Location of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, index: &RunIndex) -> StorageResult<()> {
        let file = HistoryFile {
            pipelines: index.history().to_vec(),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl RunStore for JsonFileRunStore {
    async fn insert(&self, run: PipelineRun) -> StorageResult<()> {
        let mut index = self.index.lock().await;
        index.insert(run);
        self.persist(&index).await
    }

    async fn update(&self, run: PipelineRun) -> StorageResult<()> {
        let mut index = self.index.lock().await;
        index.update(run);
        self.persist(&index).await
    }

    async fn get(&self, id: &RunId) -> StorageResult<Option<PipelineRun>> {
        let index = self.index.lock().await;
        Ok(index.get(id).cloned())
    }

    async fn list(&self, limit: usize) -> StorageResult<Vec<PipelineRun>> {
        let index = self.index.lock().await;
        Ok(index.list(limit))
    }

    async fn latest(&self) -> StorageResult<Option<PipelineRun>> {
        let index = self.index.lock().await;
        Ok(index.latest().cloned())
    }

    async fn in_flight(&self) -> StorageResult<Vec<RunId>> {
        let index = self.index.lock().await;
        Ok(index.in_flight())
    }
}

fn load_history(path: &Path) -> Vec<PipelineRun> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read run history");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<HistoryFile>(&bytes) {
        Ok(file) => file.pipelines,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed run history");
            Vec::new()
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
