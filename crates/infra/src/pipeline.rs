//! Shared signal application used by both the webhook receiver and the poll
//! sweeper.
//!
//! Order of work for one signal:
//! 1. load the job and check it belongs to the correlated recording
//! 2. ask the reconciler for the transition
//! 3. commit it conditionally (compare-and-set on the observed job state)
//! 4. only after `Applied`: sync the projection, then enqueue analysis
//!
//! Failures in step 4 are logged and never undo the canonical write.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use callscribe_core::{
    reconcile, ExternalBotId, PipelineError, Recording, RecordingId, SideEffect, Signal,
    SignalSource, Transition, VendorJobId,
};

use crate::analysis::AnalysisTrigger;
use crate::projections::ProjectionSync;
use crate::store::{Commit, CommitOutcome, RecordingStore};

/// Compare-and-set retries when a non-terminal job moves under us.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Result of applying one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// A terminal transition was committed by this call.
    Applied,
    /// Non-terminal signal; the job state may have advanced.
    Acknowledged,
    /// The job was already terminal, or another signal won the race.
    Duplicate,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Acknowledged => "acknowledged",
            ApplyOutcome::Duplicate => "duplicate",
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn RecordingStore>,
    projection: ProjectionSync,
    analysis: AnalysisTrigger,
}

impl Pipeline {
    pub fn new(store: Arc<dyn RecordingStore>, projection: ProjectionSync, analysis: AnalysisTrigger) -> Self {
        Self {
            store,
            projection,
            analysis,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordingStore> {
        &self.store
    }

    /// Apply a validated signal for the job owned by `recording_id`.
    ///
    /// `fallback_bot` is the bot id carried out-of-band by the signal (webhook
    /// query string); the recording's stored bot id takes precedence.
    pub async fn apply_signal(
        &self,
        recording_id: RecordingId,
        fallback_bot: Option<&ExternalBotId>,
        signal: &Signal,
        source: SignalSource,
    ) -> Result<ApplyOutcome, PipelineError> {
        let job = self
            .store
            .get_job(&signal.job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("job {}", signal.job_id)))?;

        if job.recording_id != recording_id {
            return Err(PipelineError::malformed(format!(
                "job {} does not belong to recording {recording_id}",
                signal.job_id
            )));
        }

        let mut observed = job.state;
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let transition = reconcile::apply(observed, &signal.kind);

            if observed.is_terminal() {
                debug!(
                    %source,
                    recording_id = %recording_id,
                    job_id = %signal.job_id,
                    state = %observed,
                    "job already terminal; signal ignored"
                );
                return Ok(ApplyOutcome::Duplicate);
            }
            if transition.is_noop() {
                debug!(
                    %source,
                    recording_id = %recording_id,
                    job_id = %signal.job_id,
                    state = %observed,
                    "signal acknowledged"
                );
                return Ok(ApplyOutcome::Acknowledged);
            }

            let commit = Commit {
                job_id: signal.job_id.clone(),
                recording_id,
                expected: transition.from,
                next: transition.to,
                error_message: transition.error_message().map(str::to_string),
                patch: transition.recording_patch(),
                at: Utc::now(),
            };

            match self.store.commit(commit).await? {
                CommitOutcome::Applied(recording) => {
                    info!(
                        %source,
                        recording_id = %recording_id,
                        job_id = %signal.job_id,
                        from = %transition.from,
                        to = %transition.to,
                        "job transition committed"
                    );
                    if !transition.to.is_terminal() {
                        return Ok(ApplyOutcome::Acknowledged);
                    }
                    if let Some(failure) = transition.vendor_failure() {
                        warn!(
                            %source,
                            recording_id = %recording_id,
                            job_id = %signal.job_id,
                            code = failure.code(),
                            error = %failure,
                            "vendor failed transcription job"
                        );
                    }
                    self.run_follow_ups(&transition, &recording, &signal.job_id, fallback_bot)
                        .await;
                    return Ok(ApplyOutcome::Applied);
                }
                CommitOutcome::Stale { current } => {
                    debug!(
                        %source,
                        recording_id = %recording_id,
                        job_id = %signal.job_id,
                        expected = %transition.from,
                        current = %current,
                        "job moved concurrently"
                    );
                    observed = current;
                }
            }
        }

        Err(PipelineError::store(format!(
            "job {} kept changing; gave up after {MAX_COMMIT_ATTEMPTS} attempts",
            signal.job_id
        )))
    }

    async fn run_follow_ups(
        &self,
        transition: &Transition,
        recording: &Recording,
        job_id: &VendorJobId,
        fallback_bot: Option<&ExternalBotId>,
    ) {
        if let (Some(stored), Some(claimed)) = (recording.external_bot_id.as_ref(), fallback_bot) {
            if stored != claimed {
                warn!(
                    recording_id = %recording.id,
                    stored_bot_id = %stored,
                    callback_bot_id = %claimed,
                    "bot id mismatch; using stored value"
                );
            }
        }

        for effect in transition.follow_ups() {
            match effect {
                SideEffect::SyncProjection => {
                    if let Err(e) = self.projection.sync(recording, fallback_bot).await {
                        warn!(
                            recording_id = %recording.id,
                            job_id = %job_id,
                            error = %e,
                            "projection sync failed"
                        );
                    }
                }
                SideEffect::TriggerAnalysis => {
                    let bot = recording.external_bot_id.clone().or_else(|| fallback_bot.cloned());
                    if let Err(e) = self.analysis.enqueue(recording.id, bot, job_id) {
                        warn!(
                            recording_id = %recording.id,
                            job_id = %job_id,
                            error = %e,
                            "failed to enqueue analysis"
                        );
                    }
                }
                SideEffect::PersistTranscript(_) | SideEffect::MarkRecordingFailed { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::{InMemoryProjectionStore, ProjectionStore};
    use crate::store::InMemoryRecordingStore;
    use crate::tasks::{InMemoryTaskStore, RetryPolicy, TaskStore};
    use callscribe_core::{
        JobState, MeetingProjection, ProjectionKey, ProjectionStatus, RecordingStatus, SignalKind, Transcript,
        TranscriptionJob,
    };

    struct Harness {
        store: Arc<InMemoryRecordingStore>,
        projections: Arc<InMemoryProjectionStore>,
        tasks: Arc<InMemoryTaskStore>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRecordingStore::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let pipeline = Pipeline::new(
            store.clone(),
            ProjectionSync::new(projections.clone(), "meetingbaas"),
            AnalysisTrigger::new(tasks.clone(), RetryPolicy::default()),
        );
        Harness {
            store,
            projections,
            tasks,
            pipeline,
        }
    }

    fn bot() -> ExternalBotId {
        ExternalBotId::parse("bot-1").unwrap()
    }

    fn job(id: &str) -> VendorJobId {
        VendorJobId::parse(id).unwrap()
    }

    fn seed(h: &Harness, job_id: &str) -> RecordingId {
        let id = RecordingId::new();
        h.store
            .insert_recording(Recording::transcribing(id, job(job_id)).with_bot(bot()))
            .unwrap();
        h.store
            .register_job(TranscriptionJob::queued(job(job_id), id, Utc::now()))
            .unwrap();
        h.projections
            .insert(MeetingProjection::pending(ProjectionKey::new(bot(), "meetingbaas")))
            .unwrap();
        id
    }

    fn done(job_id: &str) -> Signal {
        Signal::done(job(job_id), Transcript::from_text("hello world"))
    }

    #[tokio::test]
    async fn done_signal_captures_transcript_and_enqueues_analysis_once() {
        let h = harness();
        let r1 = seed(&h, "J1");

        let outcome = h
            .pipeline
            .apply_signal(r1, Some(&bot()), &done("J1"), SignalSource::Webhook)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let recording = h.store.get_recording(r1).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Processing);
        assert_eq!(recording.transcript_text.as_deref(), Some("hello world"));
        assert_eq!(h.tasks.stats().unwrap().pending, 1);

        let row = h
            .projections
            .get(&ProjectionKey::new(bot(), "meetingbaas"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.transcript_text.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn repeated_done_is_a_duplicate_with_identical_state() {
        let h = harness();
        let r1 = seed(&h, "J1");

        h.pipeline
            .apply_signal(r1, None, &done("J1"), SignalSource::Webhook)
            .await
            .unwrap();
        let after_first = h.store.get_recording(r1).await.unwrap().unwrap();

        let outcome = h
            .pipeline
            .apply_signal(r1, None, &done("J1"), SignalSource::Poll)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Duplicate);

        let after_second = h.store.get_recording(r1).await.unwrap().unwrap();
        assert_eq!(after_first, after_second);
        assert_eq!(h.tasks.stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn error_signal_fails_recording_and_projection() {
        let h = harness();
        let r2 = seed(&h, "J2");

        let outcome = h
            .pipeline
            .apply_signal(r2, None, &Signal::error(job("J2"), "audio corrupted"), SignalSource::Poll)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let recording = h.store.get_recording(r2).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Failed);
        assert_eq!(recording.error_message.as_deref(), Some("audio corrupted"));
        assert_eq!(h.tasks.stats().unwrap(), Default::default());

        let row = h
            .projections
            .get(&ProjectionKey::new(bot(), "meetingbaas"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.processing_status, ProjectionStatus::Failed);
        assert!(row.transcript_text.is_none());
    }

    #[tokio::test]
    async fn processing_signal_is_acknowledged_and_advances_state() {
        let h = harness();
        let r1 = seed(&h, "J1");

        let outcome = h
            .pipeline
            .apply_signal(r1, None, &Signal::processing(job("J1")), SignalSource::Webhook)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Acknowledged);

        let stored = h.store.get_job(&job("J1")).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
        let recording = h.store.get_recording(r1).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Transcribing);

        // Queued after processing does not regress.
        h.pipeline
            .apply_signal(r1, None, &Signal::new(job("J1"), SignalKind::Queued), SignalSource::Poll)
            .await
            .unwrap();
        let stored = h.store.get_job(&job("J1")).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
    }

    #[tokio::test]
    async fn job_of_another_recording_is_malformed() {
        let h = harness();
        seed(&h, "J1");
        let other = RecordingId::new();

        let err = h
            .pipeline
            .apply_signal(other, None, &done("J1"), SignalSource::Webhook)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSignal(_)));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let h = harness();
        let r1 = seed(&h, "J1");

        let err = h
            .pipeline
            .apply_signal(r1, None, &done("J404"), SignalSource::Webhook)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_done_signals_apply_once() {
        let h = harness();
        let r1 = seed(&h, "J1");

        let a = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .apply_signal(r1, None, &done("J1"), SignalSource::Webhook)
                    .await
            })
        };
        let b = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .apply_signal(r1, None, &done("J1"), SignalSource::Poll)
                    .await
            })
        };

        let mut outcomes = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::Duplicate]);
        assert_eq!(h.tasks.stats().unwrap().pending, 1);
    }
}
