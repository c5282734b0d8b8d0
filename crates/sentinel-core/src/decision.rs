//! Per-run deployment decision artifact (`security_decision.json`).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_state::{PipelineRun, RunId, VulnerabilitySummary};

use crate::error::Result;
use crate::policy::PolicyEvaluation;

/// File name of the decision artifact inside a run's report directory.
pub const DECISION_FILE: &str = "security_decision.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approved,
    Blocked,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Decision::Approved
        } else {
            Decision::Blocked
        }
    }
}

/// Deployment decision written for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionArtifact {
    pub pipeline_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub security_score: u32,
    pub is_deployable: bool,
    pub vulnerability_summary: VulnerabilitySummary,
    pub decision: Decision,
    /// Policy violations, empty when nothing was violated.
    pub reasons: Vec<String>,
}

impl DecisionArtifact {
    pub fn new(run: &PipelineRun, summary: &VulnerabilitySummary, evaluation: &PolicyEvaluation) -> Self {
        Self {
            pipeline_id: run.id.clone(),
            timestamp: Utc::now(),
            repository: run.repo_name.clone(),
            branch: run.branch.clone(),
            commit: run.commit_sha.clone(),
            security_score: summary.security_score,
            is_deployable: evaluation.deployment_allowed,
            vulnerability_summary: summary.clone(),
            decision: Decision::from_allowed(evaluation.deployment_allowed),
            reasons: evaluation.reasons(),
        }
    }
}

/// Write the artifact as pretty JSON, creating parent directories.
pub fn write_decision_artifact(path: &Path, artifact: &DecisionArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(artifact).map_err(std::io::Error::from)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{evaluate, DeploymentPolicy};

    #[test]
    fn test_blocked_artifact_round_trips_through_file() {
        let run = PipelineRun::new(
            Some("https://example.com/org/shop.git"),
            "main",
            Some("0123456789"),
            None,
            "bob",
        );
        let summary = VulnerabilitySummary {
            critical: 1,
            total: 1,
            image_vulns: 1,
            security_score: 85,
            ..VulnerabilitySummary::default()
        };
        let eval = evaluate(&DeploymentPolicy::default(), 85, &summary);
        let artifact = DecisionArtifact::new(&run, &summary, &eval);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(run.id.as_str()).join(DECISION_FILE);
        write_decision_artifact(&path, &artifact).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["decision"], "BLOCKED");
        assert_eq!(value["repository"], "shop");
        assert_eq!(value["commit"], "0123456");
        assert_eq!(value["is_deployable"], false);
        assert_eq!(value["reasons"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(
            serde_json::to_value(Decision::from_allowed(true)).unwrap(),
            "APPROVED"
        );
        assert_eq!(Decision::from_allowed(false), Decision::Blocked);
    }
}
