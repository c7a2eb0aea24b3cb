//! `callscribe-core` — domain foundation of the transcription reconciliation
//! pipeline.
//!
//! This crate contains **pure domain** logic (no infrastructure concerns):
//! identifiers, job and recording records, signal validation, and the
//! reconciler that decides every job transition.

pub mod error;
pub mod id;
pub mod job;
pub mod projection;
pub mod reconcile;
pub mod recording;
pub mod signal;
pub mod transcript;

pub use error::{PipelineError, PipelineResult};
pub use id::{ExternalBotId, RecordingId, VendorJobId};
pub use job::{JobState, TranscriptionJob};
pub use projection::{MeetingProjection, ProjectionKey, ProjectionStatus, ProjectionUpdate};
pub use reconcile::{SideEffect, Transition};
pub use recording::{CapturedTranscript, MediaUrls, Recording, RecordingPatch, RecordingStatus};
pub use signal::{Signal, SignalKind, SignalSource, VendorPayload, VendorStatus};
pub use transcript::{Transcript, Utterance, Word};
