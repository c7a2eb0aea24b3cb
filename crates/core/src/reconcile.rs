//! The reconciler: the single place job transitions are decided.
//!
//! `apply` is pure. It looks only at the job's current state and the incoming
//! signal and returns the next state plus the side effects the caller must
//! carry out. Push callbacks and poll results both go through it.
//!
//! | current            | signal            | next                 | effects                               |
//! |--------------------|-------------------|----------------------|---------------------------------------|
//! | queued/processing  | error(msg)        | error                | mark recording failed, sync projection |
//! | queued/processing  | done(result)      | done                 | persist transcript, sync projection, trigger analysis |
//! | queued/processing  | queued/processing | furthest of the two  | none                                  |
//! | done/error         | any               | unchanged            | none                                  |

use crate::error::PipelineError;
use crate::job::JobState;
use crate::recording::{CapturedTranscript, RecordingPatch};
use crate::signal::SignalKind;

/// Work the caller performs after the transition is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Write transcript text/JSON and duration onto the recording and move it
    /// to the enrichment-pending status.
    PersistTranscript(CapturedTranscript),
    /// Mark the recording failed with the vendor's message.
    MarkRecordingFailed { message: String },
    /// Mirror the committed recording into the meeting projection.
    SyncProjection,
    /// Hand the recording to downstream analysis.
    TriggerAnalysis,
}

impl SideEffect {
    /// Effects that belong to the canonical write rather than after it.
    pub fn is_canonical(&self) -> bool {
        matches!(self, SideEffect::PersistTranscript(_) | SideEffect::MarkRecordingFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn unchanged(state: JobState) -> Self {
        Self {
            from: state,
            to: state,
            effects: Vec::new(),
        }
    }

    /// Nothing to write and nothing to do.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.effects.is_empty()
    }

    /// Message recorded on the job when it moves to `error`.
    pub fn error_message(&self) -> Option<&str> {
        self.effects.iter().find_map(|e| match e {
            SideEffect::MarkRecordingFailed { message } => Some(message.as_str()),
            _ => None,
        })
    }

    /// The vendor's own failure, when this transition records one.
    pub fn vendor_failure(&self) -> Option<PipelineError> {
        self.error_message()
            .map(|message| PipelineError::VendorTerminalError(message.to_string()))
    }

    /// The canonical recording write implied by this transition.
    pub fn recording_patch(&self) -> RecordingPatch {
        for effect in &self.effects {
            match effect {
                SideEffect::PersistTranscript(t) => return RecordingPatch::TranscriptCaptured(t.clone()),
                SideEffect::MarkRecordingFailed { message } => {
                    return RecordingPatch::Failed {
                        message: message.clone(),
                    };
                }
                SideEffect::SyncProjection | SideEffect::TriggerAnalysis => {}
            }
        }
        RecordingPatch::Unchanged
    }

    /// Effects to run once the canonical write has been committed, in order.
    pub fn follow_ups(&self) -> impl Iterator<Item = &SideEffect> {
        self.effects.iter().filter(|e| !e.is_canonical())
    }
}

/// Decide the next state of a job given its current state and a signal.
pub fn apply(current: JobState, signal: &SignalKind) -> Transition {
    if current.is_terminal() {
        return Transition::unchanged(current);
    }

    match signal {
        SignalKind::Error(message) => Transition {
            from: current,
            to: JobState::Error,
            effects: vec![
                SideEffect::MarkRecordingFailed {
                    message: message.clone(),
                },
                SideEffect::SyncProjection,
            ],
        },
        SignalKind::Done(transcript) => Transition {
            from: current,
            to: JobState::Done,
            effects: vec![
                SideEffect::PersistTranscript(CapturedTranscript {
                    text: transcript.text(),
                    json: transcript.to_json(),
                    duration_seconds: transcript.duration_seconds,
                    word_count: transcript.word_count(),
                    speaker_count: transcript.speaker_count(),
                }),
                SideEffect::SyncProjection,
                SideEffect::TriggerAnalysis,
            ],
        },
        SignalKind::Queued | SignalKind::Processing => {
            let reported = match signal {
                SignalKind::Queued => JobState::Queued,
                _ => JobState::Processing,
            };
            let to = if reported.rank() > current.rank() {
                reported
            } else {
                current
            };
            Transition {
                from: current,
                to,
                effects: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Transcript;
    use proptest::prelude::*;

    fn done() -> SignalKind {
        SignalKind::Done(Transcript::from_text("hello world").with_duration(61.0))
    }

    #[test]
    fn done_from_active_captures_transcript_and_triggers_analysis() {
        for current in [JobState::Queued, JobState::Processing] {
            let t = apply(current, &done());
            assert_eq!(t.to, JobState::Done);
            assert!(matches!(t.recording_patch(), RecordingPatch::TranscriptCaptured(ref c) if c.text == "hello world"));
            let follow: Vec<_> = t.follow_ups().cloned().collect();
            assert_eq!(follow, vec![SideEffect::SyncProjection, SideEffect::TriggerAnalysis]);
        }
    }

    #[test]
    fn error_from_active_fails_recording_without_analysis() {
        let t = apply(JobState::Processing, &SignalKind::Error("audio corrupted".into()));
        assert_eq!(t.to, JobState::Error);
        assert_eq!(t.error_message(), Some("audio corrupted"));
        assert_eq!(
            t.vendor_failure(),
            Some(PipelineError::VendorTerminalError("audio corrupted".into()))
        );
        assert!(apply(JobState::Queued, &done()).vendor_failure().is_none());
        assert!(!t.effects.contains(&SideEffect::TriggerAnalysis));
        assert!(t.effects.contains(&SideEffect::SyncProjection));
    }

    #[test]
    fn progress_signals_only_move_forward() {
        assert_eq!(apply(JobState::Queued, &SignalKind::Processing).to, JobState::Processing);
        assert_eq!(apply(JobState::Processing, &SignalKind::Queued).to, JobState::Processing);
        let t = apply(JobState::Queued, &SignalKind::Queued);
        assert!(t.is_noop());
    }

    #[test]
    fn terminal_states_ignore_everything() {
        for current in [JobState::Done, JobState::Error] {
            for signal in [SignalKind::Queued, SignalKind::Processing, done(), SignalKind::Error("x".into())] {
                let t = apply(current, &signal);
                assert!(t.is_noop(), "{current:?} + {signal:?}");
                assert_eq!(t.recording_patch(), RecordingPatch::Unchanged);
            }
        }
    }

    fn any_signal() -> impl Strategy<Value = SignalKind> {
        prop_oneof![
            Just(SignalKind::Queued),
            Just(SignalKind::Processing),
            "[a-z ]{0,12}".prop_map(|s| SignalKind::Done(Transcript::from_text(s))),
            "[a-z ]{1,12}".prop_map(SignalKind::Error),
        ]
    }

    proptest! {
        #[test]
        fn observed_states_are_monotonic(signals in prop::collection::vec(any_signal(), 0..24)) {
            let mut state = JobState::Queued;
            let mut analysis_triggers = 0;
            let mut canonical_writes = 0;

            for signal in &signals {
                let before = state;
                let t = apply(state, signal);
                prop_assert_eq!(t.from, before);
                prop_assert!(t.to.rank() >= before.rank());
                if before.is_terminal() {
                    prop_assert_eq!(t.to, before);
                }
                analysis_triggers += t.effects.iter().filter(|e| **e == SideEffect::TriggerAnalysis).count();
                canonical_writes += t.effects.iter().filter(|e| e.is_canonical()).count();
                state = t.to;
            }

            prop_assert!(analysis_triggers <= 1);
            prop_assert!(canonical_writes <= 1);
        }

        #[test]
        fn reapplying_a_signal_is_idempotent(signal in any_signal()) {
            let first = apply(JobState::Processing, &signal);
            let second = apply(first.to, &signal);
            if signal.is_terminal() {
                prop_assert!(second.is_noop());
            } else {
                prop_assert_eq!(second.to, first.to);
                prop_assert!(second.effects.is_empty());
            }
        }
    }
}
