//! Fakes for tests: a scripted vendor, a recording analysis client and a
//! store wrapper that counts queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use callscribe_core::{
    PipelineError, Recording, RecordingId, TranscriptionJob, VendorJobId, VendorPayload,
};

use crate::analysis::AnalysisClient;
use crate::store::{Commit, CommitOutcome, RecordingStore, StoreError};
use crate::tasks::AnalysisRequest;
use crate::vendor::VendorClient;

/// Vendor that answers from a per-job script. Unscripted jobs report `processing`.
#[derive(Debug, Default)]
pub struct ScriptedVendorClient {
    responses: Mutex<HashMap<String, Result<VendorPayload, PipelineError>>>,
    polled: Mutex<Vec<String>>,
}

impl ScriptedVendorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, job_id: &str, payload: VendorPayload) {
        self.responses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Ok(payload));
    }

    pub fn fail(&self, job_id: &str, error: PipelineError) {
        self.responses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Err(error));
    }

    pub fn calls(&self) -> usize {
        self.polled.lock().unwrap().len()
    }

    /// Job ids queried so far, in call order.
    pub fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl VendorClient for ScriptedVendorClient {
    async fn status(&self, job_id: &VendorJobId) -> Result<VendorPayload, PipelineError> {
        self.polled.lock().unwrap().push(job_id.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(job_id.as_str())
            .cloned()
            .unwrap_or_else(|| {
                Ok(VendorPayload {
                    id: job_id.to_string(),
                    status: "processing".to_string(),
                    result: None,
                    error: None,
                })
            })
    }
}

/// Analysis collaborator that records every request.
#[derive(Debug, Default)]
pub struct RecordingAnalysisClient {
    requests: Mutex<Vec<AnalysisRequest>>,
    failure: Option<String>,
}

impl RecordingAnalysisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisClient for RecordingAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), PipelineError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some(message) => Err(PipelineError::DownstreamTriggerFailure(message.clone())),
            None => Ok(()),
        }
    }
}

/// Delegating store that counts the sweep's listing queries.
pub struct CountingRecordingStore {
    inner: Arc<dyn RecordingStore>,
    count_active: AtomicUsize,
    list_active: AtomicUsize,
}

impl CountingRecordingStore {
    pub fn new(inner: Arc<dyn RecordingStore>) -> Self {
        Self {
            inner,
            count_active: AtomicUsize::new(0),
            list_active: AtomicUsize::new(0),
        }
    }

    pub fn count_active_calls(&self) -> usize {
        self.count_active.load(Ordering::SeqCst)
    }

    pub fn list_active_calls(&self) -> usize {
        self.list_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordingStore for CountingRecordingStore {
    async fn count_active(&self) -> Result<usize, StoreError> {
        self.count_active.fetch_add(1, Ordering::SeqCst);
        self.inner.count_active().await
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<TranscriptionJob>, StoreError> {
        self.list_active.fetch_add(1, Ordering::SeqCst);
        self.inner.list_active(limit).await
    }

    async fn get_job(&self, job_id: &VendorJobId) -> Result<Option<TranscriptionJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn get_recording(&self, id: RecordingId) -> Result<Option<Recording>, StoreError> {
        self.inner.get_recording(id).await
    }

    async fn commit(&self, commit: Commit) -> Result<CommitOutcome, StoreError> {
        self.inner.commit(commit).await
    }
}
