//! Error taxonomy for pipeline execution.

use std::path::PathBuf;

use sentinel_state::StorageError;

/// Errors produced while executing a pipeline run.
///
/// `ToolNotFound`, `ToolExecution` and `Timeout` fail the stage and abort the
/// run. `ReportParse` and `Persistence` are logged and tolerated.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{tool} not installed or not on PATH")]
    ToolNotFound { tool: String },

    #[error("{tool} exited with {}: {stderr}", describe_exit(.exit_code))]
    ToolExecution {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("unreadable report {path:?}: {reason}")]
    ReportParse { path: PathBuf, reason: String },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Classify an error raised by a record transition: a rejected
    /// transition is stage-fatal, anything else is a storage problem.
    pub fn from_record(err: StorageError) -> Self {
        match err {
            StorageError::InvalidTransition { from, to } => {
                PipelineError::InvalidTransition { from, to }
            }
            other => PipelineError::Persistence(other),
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
