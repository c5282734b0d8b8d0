//! Service facade: the operations an API layer or CLI consumes.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use sentinel_state::{
    JsonFileRunStore, PipelineRun, PipelineStatus, RunId, RunStore, StorageError,
};

use crate::config::PipelineConfig;
use crate::dispatch::{PipelineDispatcher, RunHandle};
use crate::pipeline::{ExecutionRequest, PipelineOrchestrator, RunTrigger};
use crate::policy::{DeploymentPolicy, JsonFilePolicy, PolicySource, StaticPolicy};
use crate::webhook::{PushEvent, WebhookVerifier};

/// Default page size for [`PipelineService::list`].
pub const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Manual or webhook trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub repo_url: Option<String>,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub author: String,
    /// Directory scanned in place when `repo_url` is absent.
    pub target_dir: Option<PathBuf>,
    /// Image to build or scan instead of the generated name.
    pub image_name: Option<String>,
}

impl Default for TriggerRequest {
    fn default() -> Self {
        let trigger = RunTrigger::default();
        Self {
            repo_url: trigger.repo_url,
            branch: trigger.branch,
            commit_sha: trigger.commit_sha,
            commit_message: trigger.commit_message,
            author: trigger.author,
            target_dir: None,
            image_name: None,
        }
    }
}

impl TriggerRequest {
    fn split(self) -> (RunTrigger, ExecutionRequest) {
        let trigger = RunTrigger {
            repo_url: self.repo_url.clone(),
            branch: self.branch,
            commit_sha: self.commit_sha,
            commit_message: self.commit_message,
            author: self.author,
        };
        let request = ExecutionRequest {
            repo_url: self.repo_url,
            target_dir: self.target_dir,
            image_name: self.image_name,
        };
        (trigger, request)
    }
}

/// A run accepted for execution.
#[derive(Debug)]
pub struct Triggered {
    pub pipeline_id: RunId,
    /// Status at the time of triggering (`queued`).
    pub status: PipelineStatus,
    pub handle: RunHandle,
}

/// Entry point for triggering and inspecting runs.
pub struct PipelineService {
    orchestrator: PipelineOrchestrator,
    dispatcher: PipelineDispatcher,
    verifier: WebhookVerifier,
}

impl PipelineService {
    /// Wire a service from configuration: JSON history file, policy file
    /// when configured (defaults otherwise).
    pub fn from_config(config: PipelineConfig) -> Self {
        let store: Arc<dyn RunStore> = Arc::new(JsonFileRunStore::open_with_cap(
            config.history_file(),
            config.history_cap,
        ));
        let policy: Arc<dyn PolicySource> = match &config.policy_file {
            Some(path) => Arc::new(JsonFilePolicy::new(path)),
            None => Arc::new(StaticPolicy::default()),
        };
        Self::new(store, policy, config)
    }

    pub fn new(store: Arc<dyn RunStore>, policy: Arc<dyn PolicySource>, config: PipelineConfig) -> Self {
        let verifier = WebhookVerifier::new(config.webhook_secret.clone());
        let max_concurrent = config.max_concurrent_runs;
        let orchestrator = PipelineOrchestrator::new(store, policy, Arc::new(config));
        let dispatcher = PipelineDispatcher::new(orchestrator.clone(), max_concurrent);
        Self {
            orchestrator,
            dispatcher,
            verifier,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.orchestrator.config()
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Record a queued run and start it in the background.
    pub async fn trigger(&self, request: TriggerRequest) -> Triggered {
        let (trigger, execution) = request.split();
        let run = self.orchestrator.create_run(&trigger).await;
        let pipeline_id = run.id.clone();
        let status = run.status;
        info!(run_id = %pipeline_id, repo = %run.repo_name, "Pipeline triggered");

        let handle = self.dispatcher.dispatch(run, execution);
        Triggered {
            pipeline_id,
            status,
            handle,
        }
    }

    /// Verify a push webhook and trigger a run for it.
    pub async fn trigger_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Triggered, ServiceError> {
        if !self.verifier.verify(body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(ServiceError::InvalidSignature);
        }
        let event =
            PushEvent::parse(body).map_err(|e| ServiceError::InvalidPayload(e.to_string()))?;
        let request = event.to_trigger().ok_or_else(|| {
            ServiceError::InvalidPayload("missing repository.clone_url".to_string())
        })?;
        Ok(self.trigger(request).await)
    }

    pub async fn get(&self, id: &RunId) -> Result<Option<PipelineRun>, ServiceError> {
        Ok(self.orchestrator.store().get(id).await?)
    }

    /// Most recent runs first; `None` means [`DEFAULT_LIST_LIMIT`].
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<PipelineRun>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(self.orchestrator.store().list(limit).await?)
    }

    pub async fn latest(&self) -> Result<Option<PipelineRun>, ServiceError> {
        Ok(self.orchestrator.store().latest().await?)
    }

    /// The policy the next decision will apply.
    pub fn policy(&self) -> DeploymentPolicy {
        self.orchestrator.policy().current()
    }
}
