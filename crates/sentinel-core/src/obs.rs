//! Structured lifecycle events for pipeline runs.
//!
//! Every event carries an `event` field (`run.created`, `stage.transition`,
//! ...) so log pipelines can filter on it without parsing messages.
//! [`run_span`] builds the `sentinel.run` span that instruments a dispatched
//! execution; anything logged inside it inherits `run_id`.

use tracing::{info, warn, Span};

use sentinel_state::{PipelineStatus, RunId, StageKey, StageStatus};

/// Span covering one run's execution.
pub fn run_span(run_id: &RunId) -> Span {
    tracing::info_span!("sentinel.run", run_id = %run_id)
}

/// Emit event: run created and queued.
pub fn emit_run_created(run_id: &RunId, repo_name: &str, branch: &str, author: &str) {
    info!(
        event = "run.created",
        run_id = %run_id,
        repo = %repo_name,
        branch = %branch,
        author = %author,
    );
}

/// Emit event: run picked up by a worker.
pub fn emit_run_started(run_id: &RunId) {
    info!(event = "run.started", run_id = %run_id);
}

/// Emit event: a stage changed status.
pub fn emit_stage_transition(run_id: &RunId, stage: StageKey, status: StageStatus) {
    info!(
        event = "stage.transition",
        run_id = %run_id,
        stage = %stage,
        status = %status,
    );
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(
    run_id: &RunId,
    status: PipelineStatus,
    duration_seconds: f64,
    failed_stage: Option<StageKey>,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_seconds = duration_seconds,
        failed_stage = failed_stage.map(|s| s.key()),
    );
}

/// Emit event: deployment policy applied.
pub fn emit_policy_evaluated(run_id: &RunId, score: u32, allowed: bool, violations: usize) {
    info!(
        event = "policy.evaluated",
        run_id = %run_id,
        score = score,
        allowed = allowed,
        violations = violations,
    );
}

/// Emit event: a run state write failed (warning level; the run continues).
pub fn emit_persist_error(run_id: &RunId, error: &dyn std::fmt::Display) {
    warn!(event = "store.persist_error", run_id = %run_id, error = %error);
}
