//! Background execution of pipeline runs.
//!
//! [`PipelineDispatcher::dispatch`] hands a queued run to a tokio task and
//! returns a [`RunHandle`] at once. A semaphore caps how many runs execute
//! at the same time; a run waiting for a permit stays `queued`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, Instrument};

use sentinel_state::{PipelineRun, RunId};

use crate::obs;
use crate::pipeline::{ExecutionRequest, PipelineOrchestrator};

/// Awaitable result of a dispatched run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    task: JoinHandle<PipelineRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the run to reach a terminal state.
    ///
    /// Errors only if the runtime dropped the task (e.g. during shutdown).
    pub async fn wait(self) -> Result<PipelineRun, JoinError> {
        self.task.await
    }
}

/// Runs executions on tokio tasks with bounded concurrency.
#[derive(Clone)]
pub struct PipelineDispatcher {
    orchestrator: PipelineOrchestrator,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl PipelineDispatcher {
    pub fn new(orchestrator: PipelineOrchestrator, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of runs currently holding an execution slot.
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Execute `run` in the background. Must be called inside a tokio runtime.
    ///
    /// A panic inside the execution is caught and the run is marked failed,
    /// so no run is left `running`.
    pub fn dispatch(&self, run: PipelineRun, request: ExecutionRequest) -> RunHandle {
        let run_id = run.id.clone();
        let span = obs::run_span(&run_id);
        let orchestrator = self.orchestrator.clone();
        let permits = Arc::clone(&self.permits);

        let task = tokio::spawn(
            async move {
                // The semaphore is never closed, so acquisition only waits.
                let _permit = permits.acquire_owned().await.ok();
                let snapshot = run.clone();

                match AssertUnwindSafe(orchestrator.execute_run(run, request))
                    .catch_unwind()
                    .await
                {
                    Ok(finished) => finished,
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        error!(run_id = %snapshot.id, reason = %reason, "Pipeline execution panicked");
                        orchestrator
                            .fail_after_panic(snapshot, &format!("Pipeline execution panicked: {reason}"))
                            .await
                    }
                }
            }
            .instrument(span),
        );

        RunHandle { run_id, task }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
