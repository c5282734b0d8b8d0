//! Runtime configuration for the security gate.
//!
//! Every field has a default; [`PipelineConfig::from_env`] overrides them from
//! `SENTINEL_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sentinel_state::{RunId, DEFAULT_HISTORY_CAP};
use tracing::warn;

use crate::stage::ToolCommand;

/// Base image scanned when a checkout carries no Dockerfile.
pub const DEFAULT_SCAN_IMAGE: &str = "python:3.11-slim";

/// Prefix of images built by the pipeline (`<prefix>-<run id>`).
pub const DEFAULT_IMAGE_PREFIX: &str = "sentinelops-scan";

pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;

/// Executables for the four external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub git: ToolCommand,
    pub docker: ToolCommand,
    pub bandit: ToolCommand,
    pub trivy: ToolCommand,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: ToolCommand::new("git"),
            docker: ToolCommand::new("docker"),
            bandit: ToolCommand::new("bandit"),
            trivy: ToolCommand::new("trivy"),
        }
    }
}

/// Wall-clock budget per tool-backed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub clone: Duration,
    pub build: Duration,
    pub sast_scan: Duration,
    pub image_scan: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(120),
            build: Duration::from_secs(300),
            sast_scan: Duration::from_secs(180),
            image_scan: Duration::from_secs(300),
        }
    }
}

/// A secret that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for per-run report directories.
    pub reports_dir: PathBuf,
    /// Run history file.
    pub history_file: PathBuf,
    pub history_cap: usize,
    /// Policy JSON maintained by the API layer; defaults apply when absent.
    pub policy_file: Option<PathBuf>,
    pub default_scan_image: String,
    pub image_prefix: String,
    pub max_concurrent_runs: usize,
    pub webhook_secret: Option<SecretString>,
    pub tools: ToolPaths,
    pub timeouts: StageTimeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let reports_dir = PathBuf::from("reports");
        Self {
            history_file: reports_dir.join("pipelines.json"),
            reports_dir,
            history_cap: DEFAULT_HISTORY_CAP,
            policy_file: None,
            default_scan_image: DEFAULT_SCAN_IMAGE.to_string(),
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            webhook_secret: None,
            tools: ToolPaths::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Recognized keys: `SENTINEL_REPORTS_DIR`, `SENTINEL_HISTORY_FILE`,
    /// `SENTINEL_HISTORY_CAP`, `SENTINEL_POLICY_FILE`,
    /// `SENTINEL_DEFAULT_SCAN_IMAGE`, `SENTINEL_MAX_CONCURRENT_RUNS`,
    /// `SENTINEL_WEBHOOK_SECRET`, `SENTINEL_GIT`, `SENTINEL_DOCKER`,
    /// `SENTINEL_BANDIT`, `SENTINEL_TRIVY`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("SENTINEL_REPORTS_DIR") {
            config = config.with_reports_dir(dir);
        }
        if let Some(file) = get("SENTINEL_HISTORY_FILE") {
            config.history_file = PathBuf::from(file);
        }
        if let Some(cap) = parse_count("SENTINEL_HISTORY_CAP", get("SENTINEL_HISTORY_CAP")) {
            config.history_cap = cap;
        }
        config.policy_file = get("SENTINEL_POLICY_FILE").map(PathBuf::from);
        if let Some(image) = get("SENTINEL_DEFAULT_SCAN_IMAGE") {
            config.default_scan_image = image;
        }
        if let Some(max) = parse_count(
            "SENTINEL_MAX_CONCURRENT_RUNS",
            get("SENTINEL_MAX_CONCURRENT_RUNS"),
        ) {
            config.max_concurrent_runs = max;
        }
        config.webhook_secret = get("SENTINEL_WEBHOOK_SECRET").map(SecretString::new);

        let tools = &mut config.tools;
        for (key, slot) in [
            ("SENTINEL_GIT", &mut tools.git),
            ("SENTINEL_DOCKER", &mut tools.docker),
            ("SENTINEL_BANDIT", &mut tools.bandit),
            ("SENTINEL_TRIVY", &mut tools.trivy),
        ] {
            if let Some(cmd) = get(key).as_deref().and_then(ToolCommand::parse) {
                *slot = cmd;
            }
        }

        config
    }

    /// Move the reports root; the history file follows it.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self.history_file = self.reports_dir.join("pipelines.json");
        self
    }

    /// Report directory owned by a single run.
    pub fn run_reports_dir(&self, id: &RunId) -> PathBuf {
        self.reports_dir.join(id.as_str())
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }
}

fn parse_count(key: &str, value: Option<String>) -> Option<usize> {
    let raw = value?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(key, value = %raw, "Ignoring invalid value; using default");
            None
        }
    }
}
