//! Canonical recording entity.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PipelineError;
use crate::id::{ExternalBotId, RecordingId, VendorJobId};

/// Processing status of a recording.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Media is still being moved to storage.
    Uploading,
    /// A vendor job is in flight.
    Transcribing,
    /// Transcript captured; downstream analysis pending.
    Processing,
    /// Analysis finished.
    Ready,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Transcribing => "transcribing",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl core::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "transcribing" => Ok(Self::Transcribing),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::store(format!("unknown recording status `{other}`"))),
        }
    }
}

/// Media locations, filled in by the upload path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrls {
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub status: RecordingStatus,
    /// Set by the upload path independently of transcription.
    pub upload_complete: bool,
    pub transcription_job_id: Option<VendorJobId>,
    pub external_bot_id: Option<ExternalBotId>,
    pub transcript_text: Option<String>,
    pub transcript_json: Option<JsonValue>,
    pub duration_seconds: Option<f64>,
    pub word_count: Option<u32>,
    pub speaker_count: Option<u32>,
    pub error_message: Option<String>,
    pub media: MediaUrls,
    pub updated_at: DateTime<Utc>,
}

impl Recording {
    /// A recording whose transcription job has just been submitted.
    pub fn transcribing(id: RecordingId, job_id: VendorJobId) -> Self {
        Self {
            id,
            status: RecordingStatus::Transcribing,
            upload_complete: false,
            transcription_job_id: Some(job_id),
            external_bot_id: None,
            transcript_text: None,
            transcript_json: None,
            duration_seconds: None,
            word_count: None,
            speaker_count: None,
            error_message: None,
            media: MediaUrls::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_bot(mut self, bot_id: ExternalBotId) -> Self {
        self.external_bot_id = Some(bot_id);
        self
    }

    pub fn with_upload(mut self, media: MediaUrls) -> Self {
        self.upload_complete = true;
        self.media = media;
        self
    }

    /// True while the poll sweeper should consider this recording.
    pub fn is_awaiting_transcript(&self) -> bool {
        self.status == RecordingStatus::Transcribing && self.transcription_job_id.is_some()
    }

    /// Apply a canonical patch produced by the reconciler.
    pub fn apply(&mut self, patch: &RecordingPatch, now: DateTime<Utc>) {
        match patch {
            RecordingPatch::Unchanged => return,
            RecordingPatch::TranscriptCaptured(t) => {
                self.status = RecordingStatus::Processing;
                self.transcript_text = Some(t.text.clone());
                self.transcript_json = Some(t.json.clone());
                if t.duration_seconds.is_some() {
                    self.duration_seconds = t.duration_seconds;
                }
                self.word_count = Some(t.word_count);
                self.speaker_count = Some(t.speaker_count);
                self.error_message = None;
            }
            RecordingPatch::Failed { message } => {
                self.status = RecordingStatus::Failed;
                self.error_message = Some(message.clone());
            }
        }
        self.updated_at = now;
    }
}

/// Transcript fields written onto the recording when a job completes.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedTranscript {
    pub text: String,
    pub json: JsonValue,
    pub duration_seconds: Option<f64>,
    pub word_count: u32,
    pub speaker_count: u32,
}

/// Canonical write that accompanies a job transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingPatch {
    Unchanged,
    TranscriptCaptured(CapturedTranscript),
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> Recording {
        Recording::transcribing(RecordingId::new(), VendorJobId::parse("J1").unwrap())
    }

    #[test]
    fn transcribing_recording_is_awaiting() {
        let mut r = rec();
        assert!(r.is_awaiting_transcript());
        r.transcription_job_id = None;
        assert!(!r.is_awaiting_transcript());
    }

    #[test]
    fn captured_transcript_moves_to_processing() {
        let mut r = rec();
        r.duration_seconds = Some(10.0);
        let patch = RecordingPatch::TranscriptCaptured(CapturedTranscript {
            text: "hello world".into(),
            json: serde_json::json!({"utterances": []}),
            duration_seconds: None,
            word_count: 2,
            speaker_count: 0,
        });
        r.apply(&patch, Utc::now());
        assert_eq!(r.status, RecordingStatus::Processing);
        assert_eq!(r.transcript_text.as_deref(), Some("hello world"));
        // absent vendor duration keeps the previously known value
        assert_eq!(r.duration_seconds, Some(10.0));
        assert!(!r.is_awaiting_transcript());
    }

    #[test]
    fn failure_records_message() {
        let mut r = rec();
        r.apply(&RecordingPatch::Failed { message: "audio corrupted".into() }, Utc::now());
        assert_eq!(r.status, RecordingStatus::Failed);
        assert_eq!(r.error_message.as_deref(), Some("audio corrupted"));
        assert!(r.transcript_text.is_none());
    }
}
