//! Job record store: canonical recordings and their vendor jobs.
//!
//! The store is where the "transition only if not already terminal" guard
//! lives. [`RecordingStore::commit`] is a compare-and-set on the job's state:
//! when a webhook and a sweep race on the same job, exactly one commit is
//! `Applied` and the other observes `Stale` and performs no side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use callscribe_core::{
    JobState, PipelineError, Recording, RecordingId, RecordingPatch, TranscriptionJob, VendorJobId,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryRecordingStore;
pub use postgres::PostgresRecordingStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => PipelineError::NotFound(msg),
            other => PipelineError::Store(other.to_string()),
        }
    }
}

/// A job transition plus the recording write that accompanies it.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub job_id: VendorJobId,
    pub recording_id: RecordingId,
    /// State the reconciler observed; the write only lands if it still holds.
    pub expected: JobState,
    pub next: JobState,
    pub error_message: Option<String>,
    pub patch: RecordingPatch,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The write landed; carries the recording as committed.
    Applied(Recording),
    /// Another writer moved the job first.
    Stale { current: JobState },
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Number of recordings awaiting a transcript. Cheap; always queried
    /// before anything heavier.
    async fn count_active(&self) -> Result<usize, StoreError>;

    /// Active jobs, oldest `started_at` first.
    async fn list_active(&self, limit: usize) -> Result<Vec<TranscriptionJob>, StoreError>;

    async fn get_job(&self, job_id: &VendorJobId) -> Result<Option<TranscriptionJob>, StoreError>;

    async fn get_recording(&self, id: RecordingId) -> Result<Option<Recording>, StoreError>;

    /// Conditionally apply a transition (see module docs).
    async fn commit(&self, commit: Commit) -> Result<CommitOutcome, StoreError>;
}
