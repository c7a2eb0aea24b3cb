//! Downstream analysis hand-off.
//!
//! A committed `done` transition enqueues one [`AnalysisTask`] per
//! (recording, vendor job); the [`TaskExecutor`](crate::tasks::TaskExecutor)
//! delivers it to the [`AnalysisClient`] with retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use callscribe_core::{ExternalBotId, PipelineError, RecordingId, VendorJobId};

use crate::tasks::{AnalysisRequest, AnalysisTask, EnqueueOutcome, RetryPolicy, TaskStore};

/// Downstream analysis collaborator.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), PipelineError>;
}

/// `POST {url}` with `{recordingId, externalBotId}`; any 2xx is success.
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAnalysisClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            PipelineError::DownstreamTriggerFailure(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), PipelineError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::DownstreamTriggerFailure(format!("analysis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::DownstreamTriggerFailure(format!(
                "analysis endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

/// Enqueues analysis tasks; never calls the collaborator inline.
#[derive(Clone)]
pub struct AnalysisTrigger {
    store: Arc<dyn TaskStore>,
    policy: RetryPolicy,
}

impl AnalysisTrigger {
    pub fn new(store: Arc<dyn TaskStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn enqueue(
        &self,
        recording_id: RecordingId,
        external_bot_id: Option<ExternalBotId>,
        job_id: &VendorJobId,
    ) -> Result<EnqueueOutcome, PipelineError> {
        let task = AnalysisTask::new(
            AnalysisRequest {
                recording_id,
                external_bot_id,
            },
            job_id,
            Utc::now(),
        )
        .with_retry_policy(self.policy.clone());

        let outcome = self
            .store
            .enqueue(task)
            .map_err(|e| PipelineError::DownstreamTriggerFailure(e.to_string()))?;

        debug!(
            recording_id = %recording_id,
            job_id = %job_id,
            task_id = %outcome.task_id(),
            duplicate = matches!(outcome, EnqueueOutcome::Duplicate(_)),
            "analysis task enqueued"
        );
        Ok(outcome)
    }
}
