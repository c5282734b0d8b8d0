//! Run record model for SentinelOps pipeline executions.
//!
//! A [`PipelineRun`] carries one [`StageRecord`] for each of the six fixed
//! [`StageKey`]s. Status fields are closed enums; every status change goes
//! through a transition method that rejects out-of-order moves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Maximum length of a stored commit SHA.
pub const SHORT_SHA_LEN: usize = 7;

/// Maximum length (in characters) of a stored commit message.
pub const MAX_COMMIT_MESSAGE_LEN: usize = 100;

/// Marker used for `repo_name` / `commit_sha` when a run targets a local directory.
pub const LOCAL_MARKER: &str = "local";

const MANUAL_TRIGGER_MESSAGE: &str = "Manual trigger";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Short opaque identifier for a pipeline run (8 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        RunId(uuid[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage status and record
// ---------------------------------------------------------------------------

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// pending → running → {success, failed}, or pending → skipped.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Running)
                | (StageStatus::Pending, StageStatus::Skipped)
                | (StageStatus::Running, StageStatus::Success)
                | (StageStatus::Running, StageStatus::Failed)
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete, independently timed step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Display label.
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set only once both timestamps exist.
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub logs: String,
    pub error: Option<String>,
}

impl StageRecord {
    /// Create a pending stage with the given display label.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_seconds: None,
            logs: String::new(),
            error: None,
        }
    }

    /// pending → running; stamps `started_at`.
    pub fn start(&mut self) -> Result<(), StorageError> {
        self.transition(StageStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running → success; stamps `finished_at` and the duration.
    pub fn succeed(&mut self, logs: impl Into<String>) -> Result<(), StorageError> {
        self.transition(StageStatus::Success)?;
        self.logs = logs.into();
        self.stop_clock();
        Ok(())
    }

    /// running → failed; records the causing message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StorageError> {
        self.transition(StageStatus::Failed)?;
        self.error = Some(error.into());
        self.stop_clock();
        Ok(())
    }

    /// pending → skipped. A skipped stage never gets timestamps.
    pub fn skip(&mut self, logs: impl Into<String>) -> Result<(), StorageError> {
        self.transition(StageStatus::Skipped)?;
        self.logs = logs.into();
        Ok(())
    }

    fn transition(&mut self, next: StageStatus) -> Result<(), StorageError> {
        if !self.status.can_transition_to(next) {
            return Err(StorageError::InvalidTransition {
                from: format!("{} ({})", self.name, self.status),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    fn stop_clock(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_seconds = self.started_at.map(|start| elapsed_seconds(start, now));
    }
}

/// Seconds between two timestamps, never negative.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Stage keys
// ---------------------------------------------------------------------------

/// The six fixed stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Clone,
    Build,
    SastScan,
    ImageScan,
    PolicyCheck,
    Decision,
}

impl StageKey {
    /// All stage keys in execution order.
    pub const ALL: [StageKey; 6] = [
        StageKey::Clone,
        StageKey::Build,
        StageKey::SastScan,
        StageKey::ImageScan,
        StageKey::PolicyCheck,
        StageKey::Decision,
    ];

    /// Key used in the serialized `stages` object.
    pub fn key(&self) -> &'static str {
        match self {
            StageKey::Clone => "clone",
            StageKey::Build => "build",
            StageKey::SastScan => "sast_scan",
            StageKey::ImageScan => "image_scan",
            StageKey::PolicyCheck => "policy_check",
            StageKey::Decision => "decision",
        }
    }

    /// Human-readable label shown for the stage.
    pub fn label(&self) -> &'static str {
        match self {
            StageKey::Clone => "Clone Repository",
            StageKey::Build => "Build Image",
            StageKey::SastScan => "Static Analysis Scan",
            StageKey::ImageScan => "Container Image Scan",
            StageKey::PolicyCheck => "Policy Evaluation",
            StageKey::Decision => "Deployment Decision",
        }
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Exactly one record per [`StageKey`]. Serializes as an object keyed by
/// [`StageKey::key`]; the key set cannot grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stages {
    pub clone: StageRecord,
    pub build: StageRecord,
    pub sast_scan: StageRecord,
    pub image_scan: StageRecord,
    pub policy_check: StageRecord,
    pub decision: StageRecord,
}

impl Stages {
    /// All six stages, pending.
    pub fn new() -> Self {
        Self {
            clone: StageRecord::pending(StageKey::Clone.label()),
            build: StageRecord::pending(StageKey::Build.label()),
            sast_scan: StageRecord::pending(StageKey::SastScan.label()),
            image_scan: StageRecord::pending(StageKey::ImageScan.label()),
            policy_check: StageRecord::pending(StageKey::PolicyCheck.label()),
            decision: StageRecord::pending(StageKey::Decision.label()),
        }
    }

    pub fn get(&self, key: StageKey) -> &StageRecord {
        match key {
            StageKey::Clone => &self.clone,
            StageKey::Build => &self.build,
            StageKey::SastScan => &self.sast_scan,
            StageKey::ImageScan => &self.image_scan,
            StageKey::PolicyCheck => &self.policy_check,
            StageKey::Decision => &self.decision,
        }
    }

    pub fn get_mut(&mut self, key: StageKey) -> &mut StageRecord {
        match key {
            StageKey::Clone => &mut self.clone,
            StageKey::Build => &mut self.build,
            StageKey::SastScan => &mut self.sast_scan,
            StageKey::ImageScan => &mut self.image_scan,
            StageKey::PolicyCheck => &mut self.policy_check,
            StageKey::Decision => &mut self.decision,
        }
    }

    /// Iterate stages in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (StageKey, &StageRecord)> {
        StageKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }
}

impl Default for Stages {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Pipeline status and run
// ---------------------------------------------------------------------------

/// Status of a pipeline run.
///
/// `Cancelled` is a defined terminal state; nothing produces it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Queued => "queued",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            PipelineStatus::Queued | PipelineStatus::Running => false,
            PipelineStatus::Success | PipelineStatus::Failed | PipelineStatus::Cancelled => true,
        }
    }

    /// queued → running → {success, failed, cancelled}. A queued run may also
    /// fail or be cancelled before it ever starts.
    pub fn can_transition_to(&self, next: PipelineStatus) -> bool {
        matches!(
            (self, next),
            (PipelineStatus::Queued, PipelineStatus::Running)
                | (PipelineStatus::Queued, PipelineStatus::Failed)
                | (PipelineStatus::Queued, PipelineStatus::Cancelled)
                | (PipelineStatus::Running, PipelineStatus::Success)
                | (PipelineStatus::Running, PipelineStatus::Failed)
                | (PipelineStatus::Running, PipelineStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized severity breakdown of a run's scanner findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    /// critical + high + medium + low
    pub total: u32,
    /// Raw number of SAST findings, including unrecognized severities.
    pub sast_issues: u32,
    /// Raw number of image vulnerabilities, including unrecognized severities.
    pub image_vulns: u32,
    /// 0–100
    pub security_score: u32,
}

impl Default for VulnerabilitySummary {
    fn default() -> Self {
        Self {
            critical: 0,
            high: 0,
            medium: 0,
            low: 0,
            total: 0,
            sast_issues: 0,
            image_vulns: 0,
            security_score: 100,
        }
    }
}

/// One pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub repo_name: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub author: String,
    pub status: PipelineStatus,
    pub triggered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub stages: Stages,
    pub security_score: Option<u32>,
    pub is_deployable: Option<bool>,
    pub vulnerability_summary: Option<VulnerabilitySummary>,
}

impl PipelineRun {
    /// Create a queued run with all stages pending.
    ///
    /// `repo_name` is the last path segment of `repo_url` without `.git`
    /// ("local" when absent); `commit_sha` and `commit_message` are truncated.
    pub fn new(
        repo_url: Option<&str>,
        branch: &str,
        commit_sha: Option<&str>,
        commit_message: Option<&str>,
        author: &str,
    ) -> Self {
        let commit_sha = match commit_sha.filter(|s| !s.is_empty()) {
            Some(sha) => truncate_chars(sha, SHORT_SHA_LEN),
            None => LOCAL_MARKER.to_string(),
        };
        let commit_message = match commit_message.filter(|m| !m.is_empty()) {
            Some(msg) => truncate_chars(msg, MAX_COMMIT_MESSAGE_LEN),
            None => MANUAL_TRIGGER_MESSAGE.to_string(),
        };

        Self {
            id: RunId::generate(),
            repo_name: repo_name_from_url(repo_url.unwrap_or_default()),
            branch: branch.to_string(),
            commit_sha,
            commit_message,
            author: author.to_string(),
            status: PipelineStatus::Queued,
            triggered_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_seconds: None,
            stages: Stages::new(),
            security_score: None,
            is_deployable: None,
            vulnerability_summary: None,
        }
    }

    /// queued → running; stamps `started_at`.
    pub fn start(&mut self) -> Result<(), StorageError> {
        self.transition(PipelineStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move to a terminal status and stamp `finished_at` and the duration.
    pub fn finish(&mut self, status: PipelineStatus) -> Result<(), StorageError> {
        self.transition(status)?;
        let now = Utc::now();
        let start = self.started_at.unwrap_or(self.triggered_at);
        self.finished_at = Some(now);
        self.duration_seconds = Some(elapsed_seconds(start, now));
        Ok(())
    }

    /// Queued or running.
    pub fn is_in_flight(&self) -> bool {
        !self.status.is_terminal()
    }

    /// The stage that failed, if any.
    pub fn failed_stage(&self) -> Option<StageKey> {
        self.stages
            .iter()
            .find(|(_, stage)| stage.status == StageStatus::Failed)
            .map(|(key, _)| key)
    }

    fn transition(&mut self, next: PipelineStatus) -> Result<(), StorageError> {
        if !self.status.can_transition_to(next) {
            return Err(StorageError::InvalidTransition {
                from: format!("run {} ({})", self.id, self.status),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Last path segment of a repository URL, without a `.git` suffix.
pub fn repo_name_from_url(repo_url: &str) -> String {
    let name = repo_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let name = name.strip_suffix(".git").unwrap_or(name);
    if name.is_empty() {
        LOCAL_MARKER.to_string()
    } else {
        name.to_string()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
