//! External tool invocations for the pipeline stages.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sentinel_state::StageKey;

/// Directories never handed to the static-analysis scanner.
pub const SAST_EXCLUDES: &str = ".git,node_modules,venv,__pycache__";

/// stderr marker the image scanner prints when the target image is absent.
pub const IMAGE_NOT_FOUND_MARKER: &str = "No such image";

/// How to launch one external tool: a program plus leading arguments.
///
/// Leading arguments let a tool be wrapped, e.g. `sh ./fake-trivy.sh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// A program with fixed leading arguments.
    pub fn wrapped(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a whitespace-separated command line ("sh /opt/bandit.sh").
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// A fully resolved tool call for one stage.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Stage this call belongs to.
    pub stage: StageKey,

    /// Short tool name used in errors and logs ("git", "bandit", ...).
    pub tool: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Wall-clock budget.
    pub timeout: Duration,

    /// Exit codes that count as "ran successfully".
    pub accepted_exit_codes: Vec<i32>,

    /// A stderr substring that turns an otherwise failing exit into success.
    pub tolerated_stderr: Option<&'static str>,
}

impl ToolInvocation {
    fn new(stage: StageKey, tool: &str, base: &ToolCommand, args: Vec<String>, timeout: Duration) -> Self {
        let mut command = Vec::with_capacity(1 + base.args.len() + args.len());
        command.push(base.program.clone());
        command.extend(base.args.iter().cloned());
        command.extend(args);
        Self {
            stage,
            tool: tool.to_string(),
            command,
            timeout,
            accepted_exit_codes: vec![0],
            tolerated_stderr: None,
        }
    }

    /// `git clone --depth 1 --branch <branch> <url> <dest>`
    pub fn clone_repo(
        git: &ToolCommand,
        repo_url: &str,
        branch: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Self {
        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            repo_url.to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        Self::new(StageKey::Clone, "git", git, args, timeout)
    }

    /// `docker build -t <image> <context>`
    pub fn build_image(docker: &ToolCommand, image: &str, context: &Path, timeout: Duration) -> Self {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            context.to_string_lossy().into_owned(),
        ];
        Self::new(StageKey::Build, "docker", docker, args, timeout)
    }

    /// `bandit -r <dir> -f json -o <report> --exclude ...`
    ///
    /// Exit code 1 means "findings present" and is accepted.
    pub fn sast_scan(bandit: &ToolCommand, target: &Path, report: &Path, timeout: Duration) -> Self {
        let args = vec![
            "-r".to_string(),
            target.to_string_lossy().into_owned(),
            "-f".to_string(),
            "json".to_string(),
            "-o".to_string(),
            report.to_string_lossy().into_owned(),
            "--exclude".to_string(),
            SAST_EXCLUDES.to_string(),
        ];
        let mut invocation = Self::new(StageKey::SastScan, "bandit", bandit, args, timeout);
        invocation.accepted_exit_codes = vec![0, 1];
        invocation
    }

    /// `trivy image --format json --output <report> <image>`
    ///
    /// A missing image is tolerated so the scan degrades instead of failing.
    pub fn image_scan(trivy: &ToolCommand, image: &str, report: &Path, timeout: Duration) -> Self {
        let args = vec![
            "image".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--output".to_string(),
            report.to_string_lossy().into_owned(),
            image.to_string(),
        ];
        let mut invocation = Self::new(StageKey::ImageScan, "trivy", trivy, args, timeout);
        invocation.tolerated_stderr = Some(IMAGE_NOT_FOUND_MARKER);
        invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(60);

    #[test]
    fn test_tool_command_parse() {
        let cmd = ToolCommand::parse("sh  /opt/fake-bandit.sh").unwrap();
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["/opt/fake-bandit.sh"]);
        assert!(ToolCommand::parse("   ").is_none());
    }

    #[test]
    fn test_clone_command() {
        let inv = ToolInvocation::clone_repo(
            &ToolCommand::new("git"),
            "https://example.com/org/app.git",
            "main",
            Path::new("/tmp/work"),
            Duration::from_secs(120),
        );
        assert_eq!(inv.stage, StageKey::Clone);
        assert_eq!(
            inv.command,
            vec![
                "git",
                "clone",
                "--depth",
                "1",
                "--branch",
                "main",
                "https://example.com/org/app.git",
                "/tmp/work"
            ]
        );
        assert_eq!(inv.accepted_exit_codes, vec![0]);
    }

    #[test]
    fn test_wrapped_tool_prepends_args() {
        let docker = ToolCommand::wrapped("sh", &["fake-docker.sh"]);
        let inv = ToolInvocation::build_image(&docker, "scan-1", Path::new("/w"), T);
        assert_eq!(inv.command, vec!["sh", "fake-docker.sh", "build", "-t", "scan-1", "/w"]);
    }

    #[test]
    fn test_sast_accepts_findings_exit_code() {
        let inv = ToolInvocation::sast_scan(
            &ToolCommand::new("bandit"),
            Path::new("/w"),
            Path::new("/r/bandit-report.json"),
            T,
        );
        assert_eq!(inv.accepted_exit_codes, vec![0, 1]);
        assert!(inv.command.contains(&SAST_EXCLUDES.to_string()));
        assert!(inv.command.contains(&"/r/bandit-report.json".to_string()));
    }

    #[test]
    fn test_image_scan_tolerates_missing_image() {
        let inv = ToolInvocation::image_scan(
            &ToolCommand::new("trivy"),
            "python:3.11-slim",
            Path::new("/r/trivy-report.json"),
            T,
        );
        assert_eq!(inv.tolerated_stderr, Some(IMAGE_NOT_FOUND_MARKER));
        assert_eq!(inv.command.last().map(String::as_str), Some("python:3.11-slim"));
    }
}
