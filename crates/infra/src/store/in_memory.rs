//! In-memory job record store for tests/dev.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use callscribe_core::{JobState, Recording, RecordingId, RecordingStatus, TranscriptionJob, VendorJobId};

use super::{Commit, CommitOutcome, RecordingStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    recordings: HashMap<RecordingId, Recording>,
    jobs: HashMap<VendorJobId, TranscriptionJob>,
}

/// In-memory store. One lock guards recordings and jobs together so a commit
/// is atomic across both.
#[derive(Debug, Default)]
pub struct InMemoryRecordingStore {
    inner: RwLock<Inner>,
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Storage("recording store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("recording store lock poisoned".to_string()))
    }

    /// Insert or replace a recording (seeding for tests/dev).
    pub fn insert_recording(&self, recording: Recording) -> Result<(), StoreError> {
        self.write()?.recordings.insert(recording.id, recording);
        Ok(())
    }

    /// Attach a newly submitted job to its recording.
    ///
    /// Rejects a second active job for the same recording.
    pub fn register_job(&self, job: TranscriptionJob) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        if inner.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Conflict(format!("job {} already registered", job.job_id)));
        }
        let busy = inner
            .jobs
            .values()
            .any(|j| j.recording_id == job.recording_id && j.is_active());
        if busy {
            return Err(StoreError::Conflict(format!(
                "recording {} already has an active job",
                job.recording_id
            )));
        }

        let recording = inner
            .recordings
            .get_mut(&job.recording_id)
            .ok_or_else(|| StoreError::NotFound(format!("recording {}", job.recording_id)))?;
        recording.status = RecordingStatus::Transcribing;
        recording.transcription_job_id = Some(job.job_id.clone());

        inner.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    /// Mark a recording's media upload as finished (normally done by the upload path).
    pub fn complete_upload(
        &self,
        id: RecordingId,
        media: callscribe_core::MediaUrls,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let recording = inner
            .recordings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("recording {id}")))?;
        recording.upload_complete = true;
        recording.media = media;
        Ok(())
    }
}

#[async_trait]
impl RecordingStore for InMemoryRecordingStore {
    async fn count_active(&self) -> Result<usize, StoreError> {
        Ok(self
            .read()?
            .recordings
            .values()
            .filter(|r| r.is_awaiting_transcript())
            .count())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<TranscriptionJob>, StoreError> {
        let inner = self.read()?;
        let mut active: Vec<TranscriptionJob> = inner
            .recordings
            .values()
            .filter(|r| r.is_awaiting_transcript())
            .filter_map(|r| r.transcription_job_id.as_ref())
            .filter_map(|job_id| inner.jobs.get(job_id))
            .cloned()
            .collect();

        active.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        active.truncate(limit);
        Ok(active)
    }

    async fn get_job(&self, job_id: &VendorJobId) -> Result<Option<TranscriptionJob>, StoreError> {
        Ok(self.read()?.jobs.get(job_id).cloned())
    }

    async fn get_recording(&self, id: RecordingId) -> Result<Option<Recording>, StoreError> {
        Ok(self.read()?.recordings.get(&id).cloned())
    }

    async fn commit(&self, commit: Commit) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.write()?;

        let current = match inner.jobs.get(&commit.job_id) {
            Some(job) if job.recording_id == commit.recording_id => job.state,
            Some(_) => {
                return Err(StoreError::Conflict(format!(
                    "job {} does not belong to recording {}",
                    commit.job_id, commit.recording_id
                )));
            }
            None => return Err(StoreError::NotFound(format!("job {}", commit.job_id))),
        };

        if current.is_terminal() || current != commit.expected {
            return Ok(CommitOutcome::Stale { current });
        }

        if !inner.recordings.contains_key(&commit.recording_id) {
            return Err(StoreError::NotFound(format!("recording {}", commit.recording_id)));
        }

        if let Some(job) = inner.jobs.get_mut(&commit.job_id) {
            job.state = commit.next;
            job.updated_at = commit.at;
            if commit.next == JobState::Error {
                job.error_message = commit.error_message.clone();
            }
        }

        let recording = inner
            .recordings
            .get_mut(&commit.recording_id)
            .ok_or_else(|| StoreError::NotFound(format!("recording {}", commit.recording_id)))?;
        recording.apply(&commit.patch, commit.at);

        Ok(CommitOutcome::Applied(recording.clone()))
    }
}
