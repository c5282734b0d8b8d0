//! Pipeline orchestration: the six-stage security gate.
//!
//! [`PipelineOrchestrator::create_run`] records a queued run;
//! [`PipelineOrchestrator::execute_run`] drives it through clone, build,
//! static analysis, image scan, policy evaluation and the deployment
//! decision. Stages run in order and the first failing stage aborts the
//! rest, which stay pending. Every state change goes through the
//! [`RunStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use sentinel_state::{
    PipelineRun, PipelineStatus, RunId, RunStore, StageKey, StageStatus, VulnerabilitySummary,
};

use crate::analyzer::VulnerabilityAnalyzer;
use crate::config::PipelineConfig;
use crate::decision::{write_decision_artifact, DecisionArtifact, DECISION_FILE};
use crate::error::{PipelineError, Result};
use crate::obs;
use crate::policy::{evaluate, PolicySource};
use crate::runner::{ToolOutput, ToolRunner};
use crate::stage::ToolInvocation;

/// Prefix of scratch checkout directories.
pub const SCRATCH_PREFIX: &str = "sentinelops_";

pub const SAST_REPORT_FILE: &str = "bandit-report.json";
pub const IMAGE_REPORT_FILE: &str = "trivy-report.json";

/// Who and what triggered a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTrigger {
    pub repo_url: Option<String>,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub author: String,
}

impl Default for RunTrigger {
    fn default() -> Self {
        Self {
            repo_url: None,
            branch: "main".to_string(),
            commit_sha: None,
            commit_message: None,
            author: "manual".to_string(),
        }
    }
}

/// Where the code to scan comes from.
///
/// With `repo_url` the repository is cloned into a scratch directory that is
/// removed afterwards. Without it `target_dir` (or the current directory) is
/// scanned in place and never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub repo_url: Option<String>,
    pub target_dir: Option<PathBuf>,
    pub image_name: Option<String>,
}

enum WorkDir {
    Caller(PathBuf),
    Scratch(TempDir),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Caller(path) => path,
            WorkDir::Scratch(dir) => dir.path(),
        }
    }

    fn release(self) {
        if let WorkDir::Scratch(dir) = self {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                debug!(path = %path.display(), error = %e, "Scratch directory cleanup failed");
            }
        }
    }
}

/// Per-execution paths.
struct RunLayout {
    reports_dir: PathBuf,
    sast_report: PathBuf,
    image_report: PathBuf,
}

impl RunLayout {
    fn new(config: &PipelineConfig, id: &RunId) -> Self {
        let reports_dir = config.run_reports_dir(id);
        Self {
            sast_report: reports_dir.join(SAST_REPORT_FILE),
            image_report: reports_dir.join(IMAGE_REPORT_FILE),
            reports_dir,
        }
    }
}

/// Drives runs through the stage sequence.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    store: Arc<dyn RunStore>,
    policy: Arc<dyn PolicySource>,
    config: Arc<PipelineConfig>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        policy: Arc<dyn PolicySource>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            policy,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<dyn PolicySource> {
        &self.policy
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a queued run with all six stages pending and record it.
    ///
    /// A failed history write is logged; the run is still returned and stays
    /// readable from the store's in-memory state.
    pub async fn create_run(&self, trigger: &RunTrigger) -> PipelineRun {
        let run = PipelineRun::new(
            trigger.repo_url.as_deref(),
            &trigger.branch,
            trigger.commit_sha.as_deref(),
            trigger.commit_message.as_deref(),
            &trigger.author,
        );

        if let Err(e) = self.store.insert(run.clone()).await {
            obs::emit_persist_error(&run.id, &e);
        }
        obs::emit_run_created(&run.id, &run.repo_name, &run.branch, &run.author);
        run
    }

    /// Execute every stage of `run` and return it in a terminal state.
    ///
    /// Tool failures never escape: they fail the stage, the run is marked
    /// failed and returned.
    pub async fn execute_run(&self, mut run: PipelineRun, request: ExecutionRequest) -> PipelineRun {
        if let Err(e) = run.start() {
            warn!(run_id = %run.id, error = %e, "Run is not queued; leaving it untouched");
            return run;
        }
        obs::emit_run_started(&run.id);
        self.persist(&run).await;

        let layout = RunLayout::new(&self.config, &run.id);
        let mut work_dir = None;
        let outcome = self
            .run_stages(&mut run, &request, &layout, &mut work_dir)
            .await;

        if let Some(dir) = work_dir {
            dir.release();
        }

        let status = match &outcome {
            Ok(()) => PipelineStatus::Success,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Pipeline failed");
                PipelineStatus::Failed
            }
        };
        if let Err(e) = run.finish(status) {
            warn!(run_id = %run.id, error = %e, "Could not finish run");
        }
        self.persist(&run).await;

        obs::emit_run_finished(
            &run.id,
            run.status,
            run.duration_seconds.unwrap_or_default(),
            run.failed_stage(),
        );
        run
    }

    /// Mark a run failed after its execution panicked.
    ///
    /// Uses the store's copy when available (it holds the last persisted
    /// stage state), otherwise `fallback`.
    pub async fn fail_after_panic(&self, fallback: PipelineRun, reason: &str) -> PipelineRun {
        let mut run = match self.store.get(&fallback.id).await {
            Ok(Some(stored)) => stored,
            _ => fallback,
        };
        if !run.is_in_flight() {
            return run;
        }

        // The stage that was executing, or else the next one due, takes the failure.
        let culprit = run
            .stages
            .iter()
            .find(|(_, s)| s.status == StageStatus::Running)
            .or_else(|| run.stages.iter().find(|(_, s)| s.status == StageStatus::Pending))
            .map(|(key, _)| key);
        if let Some(key) = culprit {
            let stage = run.stages.get_mut(key);
            if stage.status == StageStatus::Pending {
                stage.start().ok();
            }
            if stage.fail(reason).is_ok() {
                obs::emit_stage_transition(&run.id, key, StageStatus::Failed);
            }
        }
        if let Err(e) = run.finish(PipelineStatus::Failed) {
            warn!(run_id = %run.id, error = %e, "Could not fail run");
        }
        self.persist(&run).await;
        obs::emit_run_finished(
            &run.id,
            run.status,
            run.duration_seconds.unwrap_or_default(),
            run.failed_stage(),
        );
        run
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        request: &ExecutionRequest,
        layout: &RunLayout,
        work_dir: &mut Option<WorkDir>,
    ) -> Result<()> {
        let tools = &self.config.tools;
        let timeouts = &self.config.timeouts;

        // clone
        match request.repo_url.as_deref() {
            Some(url) => {
                self.begin(run, StageKey::Clone).await?;
                let cloned = async {
                    let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
                    let dest = scratch.path().to_path_buf();
                    *work_dir = Some(WorkDir::Scratch(scratch));
                    let invocation =
                        ToolInvocation::clone_repo(&tools.git, url, &run.branch, &dest, timeouts.clone);
                    run_tool(&run.id, &invocation).await?;
                    Ok::<_, PipelineError>(format!("Cloned {} into {}", url, dest.display()))
                }
                .await;
                self.complete(run, StageKey::Clone, cloned).await?;
            }
            None => {
                let dir = request
                    .target_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                let logs = format!("Using local directory {}", dir.display());
                *work_dir = Some(WorkDir::Caller(dir));
                self.skip(run, StageKey::Clone, logs).await?;
            }
        }
        let source = match work_dir {
            Some(dir) => dir.path().to_path_buf(),
            None => PathBuf::from("."),
        };

        // build
        let built_image = request
            .image_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.config.image_prefix, run.id));
        let scan_target = if source.join("Dockerfile").is_file() {
            self.begin(run, StageKey::Build).await?;
            let invocation =
                ToolInvocation::build_image(&tools.docker, &built_image, &source, timeouts.build);
            let built = run_tool(&run.id, &invocation)
                .await
                .map(|_| format!("Built image: {built_image}"));
            self.complete(run, StageKey::Build, built).await?;
            built_image
        } else {
            let fallback = request
                .image_name
                .clone()
                .unwrap_or_else(|| self.config.default_scan_image.clone());
            let logs = format!("No Dockerfile found; scanning {fallback}");
            self.skip(run, StageKey::Build, logs).await?;
            fallback
        };

        // sast_scan
        self.begin(run, StageKey::SastScan).await?;
        let scanned = async {
            tokio::fs::create_dir_all(&layout.reports_dir).await?;
            let invocation = ToolInvocation::sast_scan(
                &tools.bandit,
                &source,
                &layout.sast_report,
                timeouts.sast_scan,
            );
            let output = run_tool(&run.id, &invocation).await?;
            Ok::<_, PipelineError>(match output.exit_code {
                Some(1) => "Static analysis completed (findings reported)".to_string(),
                _ => "Static analysis completed".to_string(),
            })
        }
        .await;
        self.complete(run, StageKey::SastScan, scanned).await?;

        // image_scan
        self.begin(run, StageKey::ImageScan).await?;
        let invocation = ToolInvocation::image_scan(
            &tools.trivy,
            &scan_target,
            &layout.image_report,
            timeouts.image_scan,
        );
        let scanned = run_tool(&run.id, &invocation).await.map(|output| {
            if output.tolerated {
                warn!(run_id = %run.id, image = %scan_target, "Image not found; image scan degraded");
                format!("Image scan completed for {scan_target} (image not found)")
            } else {
                format!("Image scan completed for {scan_target}")
            }
        });
        self.complete(run, StageKey::ImageScan, scanned).await?;

        // policy_check
        self.begin(run, StageKey::PolicyCheck).await?;
        let sast_report = layout.sast_report.clone();
        let image_report = layout.image_report.clone();
        let analyzed = tokio::task::spawn_blocking(move || {
            VulnerabilityAnalyzer::analyze(&sast_report, &image_report)
        })
        .await
        .map_err(join_error);
        let summary = match analyzed {
            Ok(summary) => summary,
            Err(e) => return self.complete(run, StageKey::PolicyCheck, Err(e)).await,
        };
        let score = summary.security_score;
        run.vulnerability_summary = Some(summary.clone());
        run.security_score = Some(score);
        self.complete(run, StageKey::PolicyCheck, Ok(format!("Security Score: {score}/100")))
            .await?;

        // decision
        self.begin(run, StageKey::Decision).await?;
        let logs = self.decide(run, &summary, layout).await;
        self.complete(run, StageKey::Decision, logs).await?;

        Ok(())
    }

    /// Apply the current policy, record deployability and write the artifact.
    async fn decide(
        &self,
        run: &mut PipelineRun,
        summary: &VulnerabilitySummary,
        layout: &RunLayout,
    ) -> Result<String> {
        let source = Arc::clone(&self.policy);
        let policy = tokio::task::spawn_blocking(move || source.current())
            .await
            .map_err(join_error)?;
        let evaluation = evaluate(&policy, summary.security_score, summary);
        obs::emit_policy_evaluated(
            &run.id,
            summary.security_score,
            evaluation.deployment_allowed,
            evaluation.violations.len(),
        );
        run.is_deployable = Some(evaluation.deployment_allowed);

        let artifact = DecisionArtifact::new(run, summary, &evaluation);
        let path = layout.reports_dir.join(DECISION_FILE);
        let artifact_path = path.clone();
        let written =
            tokio::task::spawn_blocking(move || write_decision_artifact(&artifact_path, &artifact))
                .await
                .map_err(join_error)
                .and_then(|written| written);
        if let Err(e) = written {
            warn!(run_id = %run.id, path = %path.display(), error = %e, "Decision artifact not written");
        }

        let mut logs = if evaluation.deployment_allowed {
            "APPROVED for deployment".to_string()
        } else {
            "BLOCKED - Security requirements not met".to_string()
        };
        if evaluation.observe_only && !evaluation.violations.is_empty() {
            logs.push_str(" (observe only)");
        }
        for reason in evaluation.reasons() {
            logs.push_str("\n- ");
            logs.push_str(&reason);
        }
        Ok(logs)
    }

    async fn begin(&self, run: &mut PipelineRun, key: StageKey) -> Result<()> {
        run.stages
            .get_mut(key)
            .start()
            .map_err(PipelineError::from_record)?;
        info!(run_id = %run.id, stage = %key, "Executing stage");
        obs::emit_stage_transition(&run.id, key, StageStatus::Running);
        self.persist(run).await;
        Ok(())
    }

    /// Close a running stage. An `Err` outcome fails the stage and is
    /// returned so the caller aborts the remaining stages.
    async fn complete(&self, run: &mut PipelineRun, key: StageKey, outcome: Result<String>) -> Result<()> {
        let stage = run.stages.get_mut(key);
        let result = match outcome {
            Ok(logs) => {
                stage.succeed(logs).map_err(PipelineError::from_record)?;
                obs::emit_stage_transition(&run.id, key, StageStatus::Success);
                Ok(())
            }
            Err(e) => {
                stage.fail(e.to_string()).map_err(PipelineError::from_record)?;
                obs::emit_stage_transition(&run.id, key, StageStatus::Failed);
                Err(e)
            }
        };
        self.persist(run).await;
        result
    }

    async fn skip(&self, run: &mut PipelineRun, key: StageKey, logs: String) -> Result<()> {
        run.stages
            .get_mut(key)
            .skip(logs)
            .map_err(PipelineError::from_record)?;
        info!(run_id = %run.id, stage = %key, "Skipping stage");
        obs::emit_stage_transition(&run.id, key, StageStatus::Skipped);
        self.persist(run).await;
        Ok(())
    }

    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.store.update(run.clone()).await {
            obs::emit_persist_error(&run.id, &e);
        }
    }
}

/// Run a tool and log how long it took.
async fn run_tool(run_id: &RunId, invocation: &ToolInvocation) -> Result<ToolOutput> {
    let output = ToolRunner::execute(invocation).await?;
    info!(
        run_id = %run_id,
        tool = %output.tool,
        exit_code = ?output.exit_code,
        duration_ms = output.duration_ms,
        "Tool finished"
    );
    if !output.stderr.trim().is_empty() {
        debug!(run_id = %run_id, tool = %output.tool, stderr = %output.stderr.trim(), "Tool stderr");
    }
    Ok(output)
}

/// Blocking work that panicked keeps unwinding so the dispatcher records it.
fn join_error(err: JoinError) -> PipelineError {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    PipelineError::Io(std::io::Error::other(err))
}
