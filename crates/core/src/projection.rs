//! Denormalized meeting projection fed from the canonical recording.
//!
//! The projection belongs to another read path. This pipeline only ever
//! derives an update from an already committed [`Recording`], so the
//! projection can lag the canonical record but never lead it.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PipelineError;
use crate::id::ExternalBotId;
use crate::recording::{MediaUrls, Recording, RecordingStatus};
use crate::transcript::duration_minutes;

/// Row key: external bot id plus a source-type discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub bot_id: ExternalBotId,
    pub source_type: String,
}

impl ProjectionKey {
    pub fn new(bot_id: ExternalBotId, source_type: impl Into<String>) -> Self {
        Self {
            bot_id,
            source_type: source_type.into(),
        }
    }
}

impl core::fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.source_type, self.bot_id)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ProjectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ProjectionStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::store(format!("unknown projection status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingProjection {
    pub key: ProjectionKey,
    pub transcript_text: Option<String>,
    pub transcript_json: Option<JsonValue>,
    pub duration_minutes: Option<i32>,
    pub processing_status: ProjectionStatus,
    pub error_message: Option<String>,
    pub media: MediaUrls,
    pub updated_at: DateTime<Utc>,
}

impl MeetingProjection {
    /// An untouched row as created by the owning read path.
    pub fn pending(key: ProjectionKey) -> Self {
        Self {
            key,
            transcript_text: None,
            transcript_json: None,
            duration_minutes: None,
            processing_status: ProjectionStatus::Pending,
            error_message: None,
            media: MediaUrls::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, update: &ProjectionUpdate, now: DateTime<Utc>) {
        match update {
            ProjectionUpdate::TranscriptReady {
                transcript_text,
                transcript_json,
                duration_minutes,
                media,
            } => {
                self.transcript_text = Some(transcript_text.clone());
                self.transcript_json = Some(transcript_json.clone());
                if duration_minutes.is_some() {
                    self.duration_minutes = *duration_minutes;
                }
                self.processing_status = ProjectionStatus::Processing;
                self.error_message = None;
                if let Some(media) = media {
                    self.media = media.clone();
                }
            }
            ProjectionUpdate::Failed { message } => {
                self.processing_status = ProjectionStatus::Failed;
                self.error_message = Some(message.clone());
            }
        }
        self.updated_at = now;
    }
}

/// Fields to mirror into the projection after a committed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionUpdate {
    TranscriptReady {
        transcript_text: String,
        transcript_json: JsonValue,
        duration_minutes: Option<i32>,
        /// `None` unless the recording's upload already completed.
        media: Option<MediaUrls>,
    },
    Failed {
        message: String,
    },
}

impl ProjectionUpdate {
    /// Derive the mirror update from the committed recording.
    ///
    /// Returns `None` when the recording carries nothing to mirror.
    pub fn from_recording(recording: &Recording) -> Option<Self> {
        match recording.status {
            RecordingStatus::Processing | RecordingStatus::Ready => {
                let transcript_text = recording.transcript_text.clone()?;
                Some(Self::TranscriptReady {
                    transcript_text,
                    transcript_json: recording
                        .transcript_json
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({ "utterances": [] })),
                    duration_minutes: recording.duration_seconds.map(duration_minutes),
                    media: recording.upload_complete.then(|| recording.media.clone()),
                })
            }
            RecordingStatus::Failed => Some(Self::Failed {
                message: recording
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "transcription failed".to_string()),
            }),
            RecordingStatus::Uploading | RecordingStatus::Transcribing => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{RecordingId, VendorJobId};
    use crate::recording::{CapturedTranscript, RecordingPatch};

    fn completed(upload_complete: bool) -> Recording {
        let mut r = Recording::transcribing(RecordingId::new(), VendorJobId::parse("J1").unwrap());
        if upload_complete {
            r = r.with_upload(MediaUrls {
                video_url: Some("https://cdn/video.mp4".into()),
                audio_url: Some("https://cdn/audio.mp3".into()),
                thumbnail_url: None,
            });
        }
        r.apply(
            &RecordingPatch::TranscriptCaptured(CapturedTranscript {
                text: "hello world".into(),
                json: serde_json::json!({"utterances": []}),
                duration_seconds: Some(150.0),
                word_count: 2,
                speaker_count: 1,
            }),
            Utc::now(),
        );
        r
    }

    #[test]
    fn media_is_withheld_until_upload_completes() {
        match ProjectionUpdate::from_recording(&completed(false)) {
            Some(ProjectionUpdate::TranscriptReady { media, duration_minutes, .. }) => {
                assert!(media.is_none());
                assert_eq!(duration_minutes, Some(3));
            }
            other => panic!("unexpected update: {other:?}"),
        }

        match ProjectionUpdate::from_recording(&completed(true)) {
            Some(ProjectionUpdate::TranscriptReady { media, .. }) => {
                assert_eq!(media.unwrap().video_url.as_deref(), Some("https://cdn/video.mp4"));
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn transcribing_recording_has_nothing_to_mirror() {
        let r = Recording::transcribing(RecordingId::new(), VendorJobId::parse("J1").unwrap());
        assert!(ProjectionUpdate::from_recording(&r).is_none());
    }

    #[test]
    fn failed_update_leaves_transcript_empty() {
        let key = ProjectionKey::new(ExternalBotId::parse("bot-1").unwrap(), "meetingbaas");
        let mut p = MeetingProjection::pending(key);
        p.apply(&ProjectionUpdate::Failed { message: "audio corrupted".into() }, Utc::now());
        assert_eq!(p.processing_status, ProjectionStatus::Failed);
        assert!(p.transcript_text.is_none());
    }

    #[test]
    fn absent_media_does_not_erase_existing_urls() {
        let key = ProjectionKey::new(ExternalBotId::parse("bot-1").unwrap(), "meetingbaas");
        let mut p = MeetingProjection::pending(key);
        p.media.video_url = Some("https://old/video.mp4".into());
        let update = ProjectionUpdate::from_recording(&completed(false)).unwrap();
        p.apply(&update, Utc::now());
        assert_eq!(p.media.video_url.as_deref(), Some("https://old/video.mp4"));
        assert_eq!(p.transcript_text.as_deref(), Some("hello world"));
    }
}
