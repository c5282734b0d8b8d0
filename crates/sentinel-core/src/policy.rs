//! Deployment policy evaluation.
//!
//! Applies a [`DeploymentPolicy`] to a security score and
//! [`VulnerabilitySummary`] to produce a [`PolicyEvaluation`], the
//! allow/block decision for a run. Rules are independent: every violated
//! rule is reported, not only the first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use sentinel_state::VulnerabilitySummary;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Deployment-blocking thresholds.
///
/// Serialized with the camelCase keys used by the policy file
/// (`minScore`, `blockCritical`, ...). Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentPolicy {
    pub min_score: u32,
    pub block_critical: bool,
    pub block_high: bool,
    pub max_critical_vulns: u32,
    pub max_high_vulns: u32,
    /// When false the policy only observes: violations are reported but
    /// deployment is always allowed.
    pub auto_block: bool,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            min_score: 70,
            block_critical: true,
            block_high: true,
            max_critical_vulns: 0,
            max_high_vulns: 5,
            auto_block: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Which rule a violation came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyRule {
    MaxCritical { limit: u32 },
    MaxHigh { limit: u32 },
    MinScore { threshold: u32 },
}

/// A single violated rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule: PolicyRule,
    /// Human-readable explanation.
    pub reason: String,
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub deployment_allowed: bool,
    /// True when `auto_block` was off.
    pub observe_only: bool,
    /// Violations found (reported even in observe-only mode).
    pub violations: Vec<PolicyViolation>,
}

impl PolicyEvaluation {
    /// Violation messages in rule order.
    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.reason.clone()).collect()
    }
}

/// Evaluate `policy` against a score and severity breakdown.
pub fn evaluate(
    policy: &DeploymentPolicy,
    score: u32,
    summary: &VulnerabilitySummary,
) -> PolicyEvaluation {
    let mut violations = Vec::new();

    if policy.block_critical && summary.critical > policy.max_critical_vulns {
        violations.push(PolicyViolation {
            rule: PolicyRule::MaxCritical {
                limit: policy.max_critical_vulns,
            },
            reason: format!(
                "Critical vulnerabilities found: {} (max allowed {})",
                summary.critical, policy.max_critical_vulns
            ),
        });
    }

    if policy.block_high && summary.high > policy.max_high_vulns {
        violations.push(PolicyViolation {
            rule: PolicyRule::MaxHigh {
                limit: policy.max_high_vulns,
            },
            reason: format!(
                "Too many high vulnerabilities: {} (max allowed {})",
                summary.high, policy.max_high_vulns
            ),
        });
    }

    if score < policy.min_score {
        violations.push(PolicyViolation {
            rule: PolicyRule::MinScore {
                threshold: policy.min_score,
            },
            reason: format!(
                "Security score ({}) below threshold ({})",
                score, policy.min_score
            ),
        });
    }

    PolicyEvaluation {
        deployment_allowed: !policy.auto_block || violations.is_empty(),
        observe_only: !policy.auto_block,
        violations,
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where the active policy comes from.
pub trait PolicySource: Send + Sync {
    /// The policy to apply right now.
    fn current(&self) -> DeploymentPolicy;
}

/// A fixed policy.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy(pub DeploymentPolicy);

impl PolicySource for StaticPolicy {
    fn current(&self) -> DeploymentPolicy {
        self.0.clone()
    }
}

/// Policy read from a JSON file on every evaluation, so edits made by the
/// API layer apply to the next run without a restart.
#[derive(Debug, Clone)]
pub struct JsonFilePolicy {
    path: PathBuf,
}

impl JsonFilePolicy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for JsonFilePolicy {
    fn current(&self) -> DeploymentPolicy {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Policy file unreadable; using defaults");
                return DeploymentPolicy::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Policy file invalid; using defaults");
            DeploymentPolicy::default()
        })
    }
}
