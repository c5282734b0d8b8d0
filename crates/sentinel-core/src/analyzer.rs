//! Vulnerability analysis over scanner reports.
//!
//! Reads the static-analysis report (`results[].issue_severity`) and the
//! image-scan report (`Results[].Vulnerabilities[].Severity`), counts
//! findings by normalized severity and derives a 0–100 security score.
//!
//! A missing or malformed report counts as zero findings for that source.
//! A broken scanner degrades the signal; it never halts the pipeline.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use sentinel_state::VulnerabilitySummary;

use crate::error::PipelineError;

/// Score deduction per finding, shared by both report sources.
pub const CRITICAL_WEIGHT: u32 = 15;
pub const HIGH_WEIGHT: u32 = 8;
pub const MEDIUM_WEIGHT: u32 = 3;
pub const LOW_WEIGHT: u32 = 1;

/// Normalized finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Case-insensitive label match; anything else is `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" => Some(Severity::High),
            "MEDIUM" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => CRITICAL_WEIGHT,
            Severity::High => HIGH_WEIGHT,
            Severity::Medium => MEDIUM_WEIGHT,
            Severity::Low => LOW_WEIGHT,
        }
    }
}

// Report shapes. Only the fields the analyzer reads are modelled.

#[derive(Debug, Deserialize)]
struct SastReport {
    #[serde(default)]
    results: Vec<SastFinding>,
}

#[derive(Debug, Deserialize)]
struct SastFinding {
    #[serde(default)]
    issue_severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageReport {
    #[serde(rename = "Results", default)]
    results: Option<Vec<ImageTarget>>,
}

#[derive(Debug, Deserialize)]
struct ImageTarget {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<ImageVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct ImageVulnerability {
    #[serde(rename = "Severity", default)]
    severity: Option<String>,
}

/// Turns scanner reports into a [`VulnerabilitySummary`].
pub struct VulnerabilityAnalyzer;

impl VulnerabilityAnalyzer {
    /// Analyze both reports. Never fails.
    pub fn analyze(sast_report: &Path, image_report: &Path) -> VulnerabilitySummary {
        let mut summary = VulnerabilitySummary::default();

        match read_report::<SastReport>(sast_report) {
            Ok(report) => {
                summary.sast_issues = report.results.len() as u32;
                for finding in &report.results {
                    count(&mut summary, finding.issue_severity.as_deref());
                }
            }
            Err(e) => warn!(error = %e, "SAST report ignored"),
        }

        match read_report::<ImageReport>(image_report) {
            Ok(report) => {
                let vulns = report
                    .results
                    .unwrap_or_default()
                    .into_iter()
                    .flat_map(|target| target.vulnerabilities.unwrap_or_default());
                for vuln in vulns {
                    summary.image_vulns += 1;
                    count(&mut summary, vuln.severity.as_deref());
                }
            }
            Err(e) => warn!(error = %e, "Image scan report ignored"),
        }

        summary.total = summary.critical + summary.high + summary.medium + summary.low;
        summary.security_score = security_score(&summary);
        summary
    }
}

/// 100 minus the weighted finding counts, clamped to [0, 100].
pub fn security_score(summary: &VulnerabilitySummary) -> u32 {
    let penalty: u64 = [
        (summary.critical, Severity::Critical),
        (summary.high, Severity::High),
        (summary.medium, Severity::Medium),
        (summary.low, Severity::Low),
    ]
    .iter()
    .map(|(n, severity)| u64::from(*n) * u64::from(severity.weight()))
    .sum();

    100u64.saturating_sub(penalty) as u32
}

fn count(summary: &mut VulnerabilitySummary, label: Option<&str>) {
    match label.and_then(Severity::parse) {
        Some(Severity::Critical) => summary.critical += 1,
        Some(Severity::High) => summary.high += 1,
        Some(Severity::Medium) => summary.medium += 1,
        Some(Severity::Low) => summary.low += 1,
        None => {}
    }
}

fn read_report<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PipelineError> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::ReportParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::ReportParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
