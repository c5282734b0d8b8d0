//! SentinelOps CLI
//!
//! The `sentinel` command drives the security gate from a terminal.
//!
//! ## Commands
//!
//! - `run`: Scan a repository or local directory and print the decision
//! - `list`: Show recent runs, newest first
//! - `show`: Print one run as JSON
//! - `latest`: Print the most recent run as JSON
//! - `verify-signature`: Check a webhook body against its signature header
//! - `policy`: Print the deployment policy in effect

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use sentinel_core::config::{PipelineConfig, SecretString};
use sentinel_core::service::{PipelineService, TriggerRequest};
use sentinel_core::webhook::WebhookVerifier;
use sentinel_state::{PipelineRun, PipelineStatus, RunId, StageStatus};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SentinelOps security gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Reports directory (overrides SENTINEL_REPORTS_DIR)
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Policy file (overrides SENTINEL_POLICY_FILE)
    #[arg(long, global = true)]
    policy_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the security gate and wait for the decision
    ///
    /// Exits non-zero when the run fails or deployment is blocked.
    Run {
        /// Local directory to scan when no --repo-url is given
        #[arg(default_value = ".")]
        target: PathBuf,

        /// Repository to clone and scan
        #[arg(long)]
        repo_url: Option<String>,

        /// Branch to clone
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Commit SHA to record
        #[arg(long)]
        commit: Option<String>,

        /// Commit message to record
        #[arg(short, long)]
        message: Option<String>,

        /// Author to record
        #[arg(short, long, default_value = "manual")]
        author: String,

        /// Image name to build and scan
        #[arg(long)]
        image: Option<String>,
    },

    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a run as JSON
    Show {
        /// Run ID
        id: String,
    },

    /// Show the most recent run as JSON
    Latest,

    /// Verify a webhook signature
    VerifySignature {
        /// File holding the raw request body
        #[arg(long)]
        body: PathBuf,

        /// Value of the X-Hub-Signature-256 header
        #[arg(long)]
        signature: Option<String>,

        /// Shared secret (defaults to SENTINEL_WEBHOOK_SECRET)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Print the deployment policy in effect
    Policy,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sentinel_core::init_tracing(cli.json, level);

    let config = load_config(cli.reports_dir, cli.policy_file);

    match cli.command {
        Commands::Run {
            target,
            repo_url,
            branch,
            commit,
            message,
            author,
            image,
        } => {
            let request = TriggerRequest {
                target_dir: repo_url.is_none().then_some(target),
                repo_url,
                branch,
                commit_sha: commit,
                commit_message: message,
                author,
                image_name: image,
            };
            cmd_run(&PipelineService::from_config(config), request).await
        }
        Commands::List { limit } => cmd_list(&PipelineService::from_config(config), limit).await,
        Commands::Show { id } => cmd_show(&PipelineService::from_config(config), &id).await,
        Commands::Latest => cmd_latest(&PipelineService::from_config(config)).await,
        Commands::VerifySignature {
            body,
            signature,
            secret,
        } => cmd_verify_signature(&config, &body, signature.as_deref(), secret),
        Commands::Policy => cmd_policy(&PipelineService::from_config(config)),
    }
}

fn load_config(reports_dir: Option<PathBuf>, policy_file: Option<PathBuf>) -> PipelineConfig {
    let mut config = PipelineConfig::from_env();
    if let Some(dir) = reports_dir {
        config = config.with_reports_dir(dir);
    }
    if policy_file.is_some() {
        config.policy_file = policy_file;
    }
    config
}

/// Trigger a run and wait for it to finish
async fn cmd_run(service: &PipelineService, request: TriggerRequest) -> Result<()> {
    let triggered = service.trigger(request).await;
    println!("Pipeline {} {}", triggered.pipeline_id, triggered.status);

    let run = triggered
        .handle
        .wait()
        .await
        .context("Pipeline task did not complete")?;

    println!();
    print!("{}", render_run(&run));

    match (run.status, run.is_deployable) {
        (PipelineStatus::Success, Some(true)) => {
            println!("\n✓ Approved for deployment");
            Ok(())
        }
        (PipelineStatus::Success, _) => anyhow::bail!("Deployment blocked by policy"),
        _ => anyhow::bail!("Pipeline {} {}", run.id, run.status),
    }
}

/// List recent runs
async fn cmd_list(service: &PipelineService, limit: usize) -> Result<()> {
    let runs = service.list(Some(limit)).await?;
    if runs.is_empty() {
        println!("No pipeline runs found");
        return Ok(());
    }
    for run in &runs {
        println!("{}", render_run_line(run));
    }
    Ok(())
}

/// Print a run as JSON
async fn cmd_show(service: &PipelineService, id: &str) -> Result<()> {
    let run = service
        .get(&RunId::from(id))
        .await?
        .with_context(|| format!("Pipeline '{}' not found", id))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

/// Print the most recent run as JSON
async fn cmd_latest(service: &PipelineService) -> Result<()> {
    match service.latest().await? {
        Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
        None => println!("No pipeline runs found"),
    }
    Ok(())
}

/// Check a webhook body against its signature header
fn cmd_verify_signature(
    config: &PipelineConfig,
    body: &Path,
    signature: Option<&str>,
    secret: Option<String>,
) -> Result<()> {
    let body = std::fs::read(body).with_context(|| format!("Failed to read {:?}", body))?;
    let secret = secret
        .map(SecretString::new)
        .or_else(|| config.webhook_secret.clone());
    let verifier = WebhookVerifier::new(secret);

    if !verifier.is_enforced() {
        println!("No webhook secret configured; verification skipped");
        return Ok(());
    }
    if verifier.verify(&body, signature) {
        println!("✓ Signature valid");
        Ok(())
    } else {
        anyhow::bail!("✗ Signature invalid")
    }
}

/// Print the effective policy
fn cmd_policy(service: &PipelineService) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&service.policy())?);
    Ok(())
}

fn render_run_line(run: &PipelineRun) -> String {
    let score = run
        .security_score
        .map(|s| format!("{s}/100"))
        .unwrap_or_else(|| "-".to_string());
    let verdict = match run.is_deployable {
        Some(true) => "approved",
        Some(false) => "blocked",
        None => "-",
    };
    format!(
        "{}  {:<9}  {:<8}  {:<8}  {}@{} ({})  {}",
        run.id,
        run.status.as_str(),
        score,
        verdict,
        run.repo_name,
        run.branch,
        run.commit_sha,
        run.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn render_run(run: &PipelineRun) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run ID: {}\n", run.id));
    out.push_str(&format!(
        "Repository: {} ({} @ {})\n",
        run.repo_name, run.branch, run.commit_sha
    ));
    out.push_str(&format!("Status: {}\n", run.status));
    if let Some(duration) = run.duration_seconds {
        out.push_str(&format!("Duration: {:.1}s\n", duration));
    }
    out.push('\n');

    for (key, stage) in run.stages.iter() {
        let mark = match stage.status {
            StageStatus::Success => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "-",
            StageStatus::Pending | StageStatus::Running => " ",
        };
        out.push_str(&format!("  {} {:<22} {}", mark, stage.name, stage.status.as_str()));
        if let Some(duration) = stage.duration_seconds {
            out.push_str(&format!(" ({:.1}s)", duration));
        }
        out.push('\n');
        if let Some(error) = &stage.error {
            out.push_str(&format!("      {}: {}\n", key, error));
        }
    }

    if let Some(summary) = &run.vulnerability_summary {
        out.push('\n');
        out.push_str(&format!(
            "Security Score: {}/100 (critical {}, high {}, medium {}, low {})\n",
            summary.security_score, summary.critical, summary.high, summary.medium, summary.low
        ));
    }
    if run.is_deployable.is_some() {
        out.push_str(&format!("Decision: {}\n", run.stages.decision.logs));
    }
    out
}
