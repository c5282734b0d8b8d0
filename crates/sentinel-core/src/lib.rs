//! Sentinel Core Library
//!
//! Security gate orchestration: runs a change through clone, build, static
//! analysis, image scan, policy evaluation and a deployment decision.
//!
//! ## Layer 1 - Domain/Orchestration
//!
//! Built on `sentinel-state` for run records and history.

pub mod analyzer;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod obs;
pub mod pipeline;
pub mod policy;
pub mod runner;
pub mod service;
pub mod stage;
pub mod telemetry;
pub mod webhook;

pub use analyzer::{security_score, Severity, VulnerabilityAnalyzer};
pub use config::{PipelineConfig, SecretString, StageTimeouts, ToolPaths};
pub use decision::{Decision, DecisionArtifact};
pub use dispatch::{PipelineDispatcher, RunHandle};
pub use error::{PipelineError, Result};
pub use pipeline::{ExecutionRequest, PipelineOrchestrator, RunTrigger};
pub use policy::{
    evaluate, DeploymentPolicy, JsonFilePolicy, PolicyEvaluation, PolicySource, PolicyViolation,
    StaticPolicy,
};
pub use runner::{ToolOutput, ToolRunner};
pub use service::{PipelineService, ServiceError, Triggered, TriggerRequest};
pub use stage::{ToolCommand, ToolInvocation};
pub use telemetry::init_tracing;
pub use webhook::{PushEvent, WebhookVerifier};

pub use sentinel_state::{
    PipelineRun, PipelineStatus, RunId, RunStore, StageKey, StageRecord, StageStatus, Stages,
    VulnerabilitySummary,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
