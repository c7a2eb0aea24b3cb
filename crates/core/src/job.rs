//! Vendor transcription job records.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::id::{RecordingId, VendorJobId};

/// Lifecycle state of a vendor job.
///
/// Ordered: `Queued < Processing < {Done, Error}`. `Done` and `Error` are
/// terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    /// Position in the lifecycle; terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::Done | JobState::Error => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "done" => Ok(JobState::Done),
            "error" => Ok(JobState::Error),
            other => Err(PipelineError::store(format!("unknown job state `{other}`"))),
        }
    }
}

/// One in-flight (or finished, retained for audit) vendor job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub job_id: VendorJobId,
    pub recording_id: RecordingId,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl TranscriptionJob {
    /// A freshly submitted job.
    pub fn queued(job_id: VendorJobId, recording_id: RecordingId, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            recording_id,
            state: JobState::Queued,
            started_at,
            updated_at: started_at,
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Time elapsed since the job was submitted.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at
    }
}
