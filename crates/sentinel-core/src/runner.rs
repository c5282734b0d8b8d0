//! External tool execution with timeouts and exit-code interpretation.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stage::ToolInvocation;

/// Captured result of a tool that ran to an accepted exit.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Tool name.
    pub tool: String,

    /// Exit code (`None` when terminated by a signal).
    pub exit_code: Option<i32>,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Accepted only because stderr carried the tolerated marker.
    pub tolerated: bool,
}

/// Runs [`ToolInvocation`]s as child processes.
pub struct ToolRunner;

impl ToolRunner {
    /// Execute a tool and classify the outcome.
    ///
    /// - executable missing → [`PipelineError::ToolNotFound`]
    /// - budget exceeded → [`PipelineError::Timeout`] (the child is killed)
    /// - exit outside `accepted_exit_codes` and no tolerated stderr marker →
    ///   [`PipelineError::ToolExecution`]
    pub async fn execute(invocation: &ToolInvocation) -> Result<ToolOutput> {
        let start = Instant::now();

        let Some((exe, args)) = invocation.command.split_first() else {
            return Err(PipelineError::ToolNotFound {
                tool: invocation.tool.clone(),
            });
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(stage = %invocation.stage, command = ?invocation.command, "Spawning tool");

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolNotFound {
                    tool: invocation.tool.clone(),
                }
            } else {
                PipelineError::Io(e)
            }
        })?;

        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::Timeout {
                tool: invocation.tool.clone(),
                timeout_secs: invocation.timeout.as_secs(),
            })??;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let accepted = exit_code.is_some_and(|c| invocation.accepted_exit_codes.contains(&c));
        let tolerated = !accepted
            && invocation
                .tolerated_stderr
                .is_some_and(|marker| stderr.contains(marker));

        if !accepted && !tolerated {
            return Err(PipelineError::ToolExecution {
                tool: invocation.tool.clone(),
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput {
            tool: invocation.tool.clone(),
            exit_code,
            stderr,
            duration_ms,
            tolerated,
        })
    }
}
