//! End-to-end pipeline runs against scripted stand-ins for git, docker,
//! bandit and trivy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sentinel_core::config::PipelineConfig;
use sentinel_core::pipeline::{ExecutionRequest, PipelineOrchestrator, RunTrigger};
use sentinel_core::policy::StaticPolicy;
use sentinel_core::service::{PipelineService, TriggerRequest};
use sentinel_core::stage::ToolCommand;
use sentinel_core::webhook::sign;
use sentinel_core::{PipelineStatus, SecretString, StageKey, StageStatus};
use sentinel_state::fakes::MemoryRunStore;
use sentinel_state::{JsonFileRunStore, RunStore};
use tempfile::TempDir;

// ===========================================================================
// Fixture
// ===========================================================================

/// Writes the report named by `flag` (e.g. `-o`) with `json`, then exits.
fn report_writer(flag: &str, json: &str, exit_code: i32) -> String {
    format!(
        "out=''\n\
         while [ $# -gt 0 ]; do\n\
           if [ \"$1\" = \"{flag}\" ]; then out=\"$2\"; fi\n\
           shift\n\
         done\n\
         printf '%s' '{json}' > \"$out\"\n\
         exit {exit_code}\n"
    )
}

const CLEAN_BANDIT: &str = r#"{"results": []}"#;
const CLEAN_TRIVY: &str = r#"{"Results": []}"#;

/// Clones by creating a Dockerfile and a source file in the last argument.
const FAKE_GIT: &str = "for last; do :; done\n\
                        mkdir -p \"$last\"\n\
                        printf 'FROM scratch\\n' > \"$last/Dockerfile\"\n\
                        printf 'print(1)\\n' > \"$last/app.py\"\n";

struct Fixture {
    tools: TempDir,
    _reports: TempDir,
    target: TempDir,
    config: PipelineConfig,
}

impl Fixture {
    /// Every tool succeeds with empty reports; the target has a Dockerfile.
    fn new() -> Self {
        let tools = tempfile::tempdir().unwrap();
        let reports = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::write(target.path().join("app.py"), "print('hi')\n").unwrap();

        let config = PipelineConfig::default().with_reports_dir(reports.path().join("reports"));
        let mut fixture = Self {
            tools,
            _reports: reports,
            target,
            config,
        };
        fixture.config.tools.git = fixture.tool("git.sh", FAKE_GIT);
        fixture.config.tools.docker = fixture.tool("docker.sh", "exit 0\n");
        fixture.config.tools.bandit = fixture.tool("bandit.sh", &report_writer("-o", CLEAN_BANDIT, 0));
        fixture.config.tools.trivy =
            fixture.tool("trivy.sh", &report_writer("--output", CLEAN_TRIVY, 0));
        fixture
    }

    fn tool(&self, name: &str, script: &str) -> ToolCommand {
        let path = self.tools.path().join(name);
        std::fs::write(&path, script).unwrap();
        ToolCommand::wrapped("sh", &[path.to_str().unwrap()])
    }

    fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(MemoryRunStore::new()),
            Arc::new(StaticPolicy::default()),
            Arc::new(self.config.clone()),
        )
    }

    fn local_request(&self) -> ExecutionRequest {
        ExecutionRequest {
            target_dir: Some(self.target.path().to_path_buf()),
            ..ExecutionRequest::default()
        }
    }

    fn run_dir(&self, id: &sentinel_core::RunId) -> PathBuf {
        self.config.run_reports_dir(id)
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// ===========================================================================
// Orchestrator
// ===========================================================================

#[tokio::test]
async fn local_run_with_findings_is_approved() {
    let mut fx = Fixture::new();
    fx.config.tools.bandit = fx.tool(
        "bandit.sh",
        &report_writer("-o", r#"{"results": [{"issue_severity": "HIGH"}]}"#, 1),
    );
    fx.config.tools.trivy = fx.tool(
        "trivy.sh",
        &report_writer(
            "--output",
            r#"{"Results": [{"Vulnerabilities": [{"Severity": "MEDIUM"}]}]}"#,
            0,
        ),
    );
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.stages.clone.status, StageStatus::Skipped);
    assert!(run.stages.clone.started_at.is_none());
    for key in [
        StageKey::Build,
        StageKey::SastScan,
        StageKey::ImageScan,
        StageKey::PolicyCheck,
        StageKey::Decision,
    ] {
        let stage = run.stages.get(key);
        assert_eq!(stage.status, StageStatus::Success, "{key}");
        assert!(stage.started_at.is_some() && stage.finished_at.is_some());
        assert!(stage.duration_seconds.unwrap() >= 0.0);
    }

    // 100 - 8 - 3
    assert_eq!(run.security_score, Some(89));
    assert_eq!(run.is_deployable, Some(true));
    let summary = run.vulnerability_summary.as_ref().unwrap();
    assert_eq!((summary.high, summary.medium, summary.total), (1, 1, 2));
    assert_eq!(run.stages.policy_check.logs, "Security Score: 89/100");
    assert!(run.stages.decision.logs.starts_with("APPROVED for deployment"));
    assert!(run
        .stages
        .build
        .logs
        .starts_with(&format!("Built image: sentinelops-scan-{}", run.id)));

    let dir = fx.run_dir(&run.id);
    assert!(dir.join("bandit-report.json").exists());
    assert!(dir.join("trivy-report.json").exists());
    let decision = read_json(&dir.join("security_decision.json"));
    assert_eq!(decision["decision"], "APPROVED");
    assert_eq!(decision["security_score"], 89);

    // The caller's directory is never removed.
    assert!(fx.target.path().join("Dockerfile").exists());
}

#[tokio::test]
async fn critical_finding_blocks_deployment() {
    let mut fx = Fixture::new();
    fx.config.tools.trivy = fx.tool(
        "trivy.sh",
        &report_writer(
            "--output",
            r#"{"Results": [{"Vulnerabilities": [{"Severity": "CRITICAL"}]}]}"#,
            0,
        ),
    );
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.security_score, Some(85));
    assert_eq!(run.is_deployable, Some(false));
    assert!(run
        .stages
        .decision
        .logs
        .starts_with("BLOCKED - Security requirements not met"));

    let decision = read_json(&fx.run_dir(&run.id).join("security_decision.json"));
    assert_eq!(decision["decision"], "BLOCKED");
    assert_eq!(decision["is_deployable"], false);
    assert!(decision["reasons"][0]
        .as_str()
        .unwrap()
        .starts_with("Critical vulnerabilities found: 1"));
}

#[tokio::test]
async fn build_failure_leaves_later_stages_pending() {
    let mut fx = Fixture::new();
    fx.config.tools.docker = fx.tool("docker.sh", "echo 'no space left on device' >&2\nexit 1\n");
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.failed_stage(), Some(StageKey::Build));
    let error = run.stages.build.error.as_deref().unwrap();
    assert!(error.contains("code 1"), "{error}");
    assert!(error.contains("no space left on device"), "{error}");

    for key in [
        StageKey::SastScan,
        StageKey::ImageScan,
        StageKey::PolicyCheck,
        StageKey::Decision,
    ] {
        let stage = run.stages.get(key);
        assert_eq!(stage.status, StageStatus::Pending, "{key}");
        assert!(stage.started_at.is_none() && stage.finished_at.is_none());
    }
    assert!(run.security_score.is_none());
    assert!(run.is_deployable.is_none());
    assert!(run.finished_at.is_some());
    assert!(run.duration_seconds.unwrap() >= 0.0);
}

#[tokio::test]
async fn missing_image_scanner_is_reported() {
    let mut fx = Fixture::new();
    fx.config.tools.trivy = ToolCommand::new("/nonexistent/sentinel-trivy");
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.stages.sast_scan.status, StageStatus::Success);
    assert_eq!(run.failed_stage(), Some(StageKey::ImageScan));
    assert_eq!(
        run.stages.image_scan.error.as_deref(),
        Some("trivy not installed or not on PATH")
    );
}

#[tokio::test]
async fn missing_image_is_tolerated() {
    let mut fx = Fixture::new();
    fx.config.tools.trivy = fx.tool(
        "trivy.sh",
        "echo 'unable to inspect: No such image: ghost:latest' >&2\nexit 1\n",
    );
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.stages.image_scan.status, StageStatus::Success);
    // No image report was written: the scan counts as zero findings.
    assert_eq!(run.security_score, Some(100));
}

#[tokio::test]
async fn slow_tool_times_out() {
    let mut fx = Fixture::new();
    fx.config.tools.docker = fx.tool("docker.sh", "sleep 5\n");
    fx.config.timeouts.build = Duration::from_millis(300);
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let started = std::time::Instant::now();
    let run = orch.execute_run(run, fx.local_request()).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.failed_stage(), Some(StageKey::Build));
    assert!(run
        .stages
        .build
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn no_dockerfile_scans_fallback_image() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.target.path().join("Dockerfile")).unwrap();
    let orch = fx.orchestrator();

    let run = orch.create_run(&RunTrigger::default()).await;
    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.stages.build.status, StageStatus::Skipped);
    assert_eq!(
        run.stages.image_scan.logs,
        "Image scan completed for python:3.11-slim"
    );
}

#[tokio::test]
async fn cloned_checkout_is_removed_afterwards() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let url = "https://example.com/org/app.git";

    let trigger = RunTrigger {
        repo_url: Some(url.to_string()),
        ..RunTrigger::default()
    };
    let run = orch.create_run(&trigger).await;
    assert_eq!(run.repo_name, "app");
    let request = ExecutionRequest {
        repo_url: Some(url.to_string()),
        image_name: Some("app:ci".to_string()),
        ..ExecutionRequest::default()
    };
    let run = orch.execute_run(run, request).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.stages.clone.status, StageStatus::Success);
    assert_eq!(run.stages.build.logs, "Built image: app:ci");

    let logs = &run.stages.clone.logs;
    let work_dir = logs.split(" into ").nth(1).expect("clone logs name the checkout");
    assert!(work_dir.contains("sentinelops_"));
    assert!(!Path::new(work_dir).exists());
}

#[tokio::test]
async fn failed_clone_fails_run() {
    let mut fx = Fixture::new();
    fx.config.tools.git = fx.tool(
        "git.sh",
        "echo 'fatal: repository not found' >&2\nexit 128\n",
    );
    let orch = fx.orchestrator();
    let url = "https://example.com/org/gone.git";

    let run = orch
        .create_run(&RunTrigger {
            repo_url: Some(url.to_string()),
            ..RunTrigger::default()
        })
        .await;
    let run = orch
        .execute_run(
            run,
            ExecutionRequest {
                repo_url: Some(url.to_string()),
                ..ExecutionRequest::default()
            },
        )
        .await;

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.failed_stage(), Some(StageKey::Clone));
    assert!(run
        .stages
        .clone
        .error
        .as_deref()
        .unwrap()
        .contains("repository not found"));
    assert_eq!(run.stages.build.status, StageStatus::Pending);
}

#[tokio::test]
async fn checkout_is_removed_when_a_later_stage_fails() {
    let mut fx = Fixture::new();
    fx.config.tools.docker = fx.tool("docker.sh", "echo 'build broke' >&2\nexit 2\n");
    let orch = fx.orchestrator();
    let url = "https://example.com/org/app.git";

    let run = orch
        .create_run(&RunTrigger {
            repo_url: Some(url.to_string()),
            ..RunTrigger::default()
        })
        .await;
    let run = orch
        .execute_run(
            run,
            ExecutionRequest {
                repo_url: Some(url.to_string()),
                ..ExecutionRequest::default()
            },
        )
        .await;

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.stages.clone.status, StageStatus::Success);
    assert_eq!(run.failed_stage(), Some(StageKey::Build));

    let logs = &run.stages.clone.logs;
    let work_dir = logs.split(" into ").nth(1).expect("clone logs name the checkout");
    assert!(work_dir.contains("sentinelops_"));
    assert!(!Path::new(work_dir).exists());
}

#[tokio::test]
async fn history_write_failures_do_not_stop_the_run() {
    let fx = Fixture::new();
    let broken = tempfile::tempdir().unwrap();
    // A directory where the history file belongs makes every write fail.
    let history = broken.path().join("pipelines.json");
    std::fs::create_dir(&history).unwrap();

    let store = Arc::new(JsonFileRunStore::open(&history));
    let orch = PipelineOrchestrator::new(
        store.clone(),
        Arc::new(StaticPolicy::default()),
        Arc::new(fx.config.clone()),
    );

    let run = orch.create_run(&RunTrigger::default()).await;
    assert_eq!(run.status, PipelineStatus::Queued);
    assert!(store.update(run.clone()).await.is_err());

    let run = orch.execute_run(run, fx.local_request()).await;

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.is_deployable, Some(true));
    assert!(run.finished_at.is_some());
    assert!(run.duration_seconds.unwrap() >= 0.0);

    let stored = store.get(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PipelineStatus::Success);
    assert!(store.in_flight().await.unwrap().is_empty());
}

// ===========================================================================
// Service
// ===========================================================================

fn file_service(fx: &Fixture) -> PipelineService {
    PipelineService::from_config(fx.config.clone())
}

#[tokio::test]
async fn trigger_returns_queued_and_persists_result() {
    let fx = Fixture::new();
    let svc = file_service(&fx);

    let triggered = svc
        .trigger(TriggerRequest {
            target_dir: Some(fx.target.path().to_path_buf()),
            ..TriggerRequest::default()
        })
        .await;
    assert_eq!(triggered.status, PipelineStatus::Queued);
    assert_eq!(triggered.handle.run_id(), &triggered.pipeline_id);

    let finished = triggered.handle.wait().await.unwrap();
    assert_eq!(finished.status, PipelineStatus::Success);

    let stored = svc.get(&triggered.pipeline_id).await.unwrap().unwrap();
    assert_eq!(stored, finished);
    assert_eq!(svc.latest().await.unwrap().unwrap().id, finished.id);

    let history = read_json(&fx.config.history_file);
    assert_eq!(history["pipelines"][0]["id"], finished.id.as_str());
    assert_eq!(history["pipelines"][0]["status"], "success");
    assert!(history["updated_at"].is_string());
}

#[tokio::test]
async fn history_is_capped_newest_first() {
    let mut fx = Fixture::new();
    fx.config.history_cap = 3;
    let svc = file_service(&fx);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let triggered = svc
            .trigger(TriggerRequest {
                target_dir: Some(fx.target.path().to_path_buf()),
                ..TriggerRequest::default()
            })
            .await;
        ids.push(triggered.pipeline_id.clone());
        triggered.handle.wait().await.unwrap();
    }

    let listed = svc.list(None).await.unwrap();
    let listed_ids: Vec<_> = listed.iter().map(|r| r.id.clone()).collect();
    assert_eq!(listed_ids, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
    assert_eq!(svc.list(Some(1)).await.unwrap().len(), 1);

    let history = read_json(&fx.config.history_file);
    assert_eq!(history["pipelines"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn concurrency_limit_keeps_extra_runs_queued() {
    let mut fx = Fixture::new();
    fx.config.max_concurrent_runs = 1;
    fx.config.tools.bandit = fx.tool(
        "bandit.sh",
        &format!("sleep 1\n{}", report_writer("-o", CLEAN_BANDIT, 0)),
    );
    let svc = file_service(&fx);
    let request = TriggerRequest {
        target_dir: Some(fx.target.path().to_path_buf()),
        ..TriggerRequest::default()
    };

    let first = svc.trigger(request.clone()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = svc.trigger(request).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let first_now = svc.get(&first.pipeline_id).await.unwrap().unwrap();
    let second_now = svc.get(&second.pipeline_id).await.unwrap().unwrap();
    assert_eq!(first_now.status, PipelineStatus::Running);
    assert_eq!(second_now.status, PipelineStatus::Queued);

    assert_eq!(first.handle.wait().await.unwrap().status, PipelineStatus::Success);
    assert_eq!(second.handle.wait().await.unwrap().status, PipelineStatus::Success);
}

#[tokio::test]
async fn signed_webhook_triggers_clone_run() {
    let mut fx = Fixture::new();
    fx.config.webhook_secret = Some(SecretString::new("s3cret"));
    let svc = file_service(&fx);

    let body = br#"{
        "ref": "refs/heads/feature/login",
        "repository": {"name": "app", "clone_url": "https://example.com/org/app.git"},
        "head_commit": {"id": "abcdef1234567", "message": "Add login", "author": {"name": "alice"}}
    }"#;
    let header = sign("s3cret", body).unwrap();

    let triggered = svc.trigger_webhook(body, Some(&header)).await.unwrap();
    let run = triggered.handle.wait().await.unwrap();

    assert_eq!(run.status, PipelineStatus::Success);
    assert_eq!(run.repo_name, "app");
    assert_eq!(run.branch, "feature/login");
    assert_eq!(run.commit_sha, "abcdef1");
    assert_eq!(run.author, "alice");
    assert_eq!(run.stages.clone.status, StageStatus::Success);

    let store_view = svc.get(&run.id).await.unwrap().unwrap();
    assert_eq!(store_view.status, PipelineStatus::Success);
}

#[tokio::test]
async fn store_in_flight_index_drains() {
    let fx = Fixture::new();
    let store = Arc::new(MemoryRunStore::new());
    let orch = PipelineOrchestrator::new(
        store.clone(),
        Arc::new(StaticPolicy::default()),
        Arc::new(fx.config.clone()),
    );

    let run = orch.create_run(&RunTrigger::default()).await;
    assert_eq!(store.in_flight().await.unwrap(), vec![run.id.clone()]);

    orch.execute_run(run, fx.local_request()).await;
    assert!(store.in_flight().await.unwrap().is_empty());
}
