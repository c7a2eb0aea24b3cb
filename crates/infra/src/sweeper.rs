//! Poll fallback: periodically ask the vendor about every active job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use callscribe_core::{PipelineError, RecordingId, Signal, SignalKind, SignalSource, TranscriptionJob};

use crate::pipeline::{ApplyOutcome, Pipeline};
use crate::store::RecordingStore;
use crate::vendor::VendorClient;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub batch_limit: usize,
    pub max_concurrency: usize,
    /// Active jobs older than this are flagged, never force-failed.
    pub stale_after: chrono::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            max_concurrency: 8,
            stale_after: chrono::Duration::minutes(30),
        }
    }
}

/// Per-job failure captured during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepError {
    pub job_id: Option<String>,
    pub recording_id: Option<RecordingId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_processing: usize,
    pub stale: usize,
    pub duplicates: usize,
    pub errors: Vec<SweepError>,
}

enum PollResult {
    Completed,
    Failed,
    StillProcessing { stale: bool },
    Duplicate,
    Error(SweepError),
}

impl SweepSummary {
    fn record(&mut self, result: PollResult) {
        match result {
            PollResult::Completed => self.completed += 1,
            PollResult::Failed => self.failed += 1,
            PollResult::StillProcessing { stale } => {
                self.still_processing += 1;
                if stale {
                    self.stale += 1;
                }
            }
            PollResult::Duplicate => self.duplicates += 1,
            PollResult::Error(e) => self.errors.push(e),
        }
    }
}

#[derive(Clone)]
pub struct PollSweeper {
    store: Arc<dyn RecordingStore>,
    vendor: Arc<dyn VendorClient>,
    pipeline: Pipeline,
    config: SweepConfig,
}

impl PollSweeper {
    pub fn new(
        store: Arc<dyn RecordingStore>,
        vendor: Arc<dyn VendorClient>,
        pipeline: Pipeline,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            vendor,
            pipeline,
            config,
        }
    }

    /// Run one sweep over the active jobs.
    ///
    /// Only the initial store queries can fail the sweep; everything per job
    /// lands in the summary.
    pub async fn sweep(&self) -> Result<SweepSummary, PipelineError> {
        if self.store.count_active().await? == 0 {
            debug!("no active transcription jobs");
            return Ok(SweepSummary::default());
        }

        let batch = self.store.list_active(self.config.batch_limit).await?;
        let mut summary = SweepSummary {
            total: batch.len(),
            ..SweepSummary::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for job in batch {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::store(format!("sweep semaphore closed: {e}")))?;
            let this = self.clone();
            join_set.spawn(async move {
                let result = this.poll_one(job).await;
                drop(permit);
                result
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => summary.record(result),
                Err(e) => {
                    error!(error = %e, "poll task panicked");
                    summary.record(PollResult::Error(SweepError {
                        job_id: None,
                        recording_id: None,
                        error: e.to_string(),
                    }));
                }
            }
        }

        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            still_processing = summary.still_processing,
            stale = summary.stale,
            duplicates = summary.duplicates,
            errors = summary.errors.len(),
            "sweep finished"
        );
        Ok(summary)
    }

    async fn poll_one(&self, job: TranscriptionJob) -> PollResult {
        let capture = |e: PipelineError| {
            warn!(
                job_id = %job.job_id,
                recording_id = %job.recording_id,
                error = %e,
                "poll failed for job"
            );
            PollResult::Error(SweepError {
                job_id: Some(job.job_id.to_string()),
                recording_id: Some(job.recording_id),
                error: e.to_string(),
            })
        };

        let payload = match self.vendor.status(&job.job_id).await {
            Ok(payload) => payload,
            Err(e) => return capture(e),
        };

        if payload.id != job.job_id.as_str() {
            return capture(PipelineError::malformed(format!(
                "vendor answered for job `{}`",
                payload.id
            )));
        }

        let signal = match Signal::try_from(payload) {
            Ok(signal) => signal,
            Err(e) => return capture(e),
        };

        match self
            .pipeline
            .apply_signal(job.recording_id, None, &signal, SignalSource::Poll)
            .await
        {
            Ok(ApplyOutcome::Applied) if signal.kind.is_terminal() => {
                if matches!(signal.kind, SignalKind::Error(_)) {
                    PollResult::Failed
                } else {
                    PollResult::Completed
                }
            }
            Ok(ApplyOutcome::Duplicate) => PollResult::Duplicate,
            Ok(_) => {
                let age = job.age(Utc::now());
                let stale = age > self.config.stale_after;
                if stale {
                    warn!(
                        job_id = %job.job_id,
                        recording_id = %job.recording_id,
                        age_minutes = age.num_minutes(),
                        "transcription job is stale"
                    );
                }
                PollResult::StillProcessing { stale }
            }
            Err(e) => capture(e),
        }
    }
}

/// Runs the sweeper on a fixed interval until shut down.
pub struct SweepScheduler {
    sweeper: PollSweeper,
    interval: Duration,
}

#[derive(Debug)]
pub struct SweepSchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweepSchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "sweep scheduler panicked");
        }
    }
}

impl SweepScheduler {
    pub fn new(sweeper: PollSweeper, interval: Duration) -> Self {
        Self { sweeper, interval }
    }

    pub fn spawn(self) -> SweepSchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "sweep scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweeper.sweep().await {
                            error!(error = %e, "sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("sweep scheduler stopped");
        });

        SweepSchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisTrigger;
    use crate::projections::{InMemoryProjectionStore, ProjectionStore, ProjectionSync};
    use crate::store::InMemoryRecordingStore;
    use crate::tasks::{InMemoryTaskStore, RetryPolicy, TaskStore};
    use crate::testing::{CountingRecordingStore, ScriptedVendorClient};
    use callscribe_core::{
        ExternalBotId, JobState, MeetingProjection, ProjectionKey, ProjectionStatus, Recording,
        RecordingStatus, TranscriptionJob, VendorJobId, VendorPayload,
    };

    struct Harness {
        store: Arc<InMemoryRecordingStore>,
        counting: Arc<CountingRecordingStore>,
        vendor: Arc<ScriptedVendorClient>,
        projections: Arc<InMemoryProjectionStore>,
        tasks: Arc<InMemoryTaskStore>,
        sweeper: PollSweeper,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRecordingStore::new());
        let counting = Arc::new(CountingRecordingStore::new(store.clone()));
        let vendor = Arc::new(ScriptedVendorClient::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let pipeline = Pipeline::new(
            counting.clone(),
            ProjectionSync::new(projections.clone(), "meetingbaas"),
            AnalysisTrigger::new(tasks.clone(), RetryPolicy::default()),
        );
        let sweeper = PollSweeper::new(counting.clone(), vendor.clone(), pipeline, SweepConfig::default());
        Harness {
            store,
            counting,
            vendor,
            projections,
            tasks,
            sweeper,
        }
    }

    fn job(id: &str) -> VendorJobId {
        VendorJobId::parse(id).unwrap()
    }

    fn seed(h: &Harness, job_id: &str, started_minutes_ago: i64) -> RecordingId {
        let id = RecordingId::new();
        let bot = ExternalBotId::parse(format!("bot-{job_id}")).unwrap();
        h.store
            .insert_recording(Recording::transcribing(id, job(job_id)).with_bot(bot.clone()))
            .unwrap();
        h.store
            .register_job(TranscriptionJob::queued(
                job(job_id),
                id,
                Utc::now() - chrono::Duration::minutes(started_minutes_ago),
            ))
            .unwrap();
        h.projections
            .insert(MeetingProjection::pending(ProjectionKey::new(bot, "meetingbaas")))
            .unwrap();
        id
    }

    fn payload(id: &str, status: &str) -> VendorPayload {
        VendorPayload {
            id: id.to_string(),
            status: status.to_string(),
            result: None,
            error: None,
        }
    }

    fn done(id: &str, text: &str) -> VendorPayload {
        VendorPayload {
            result: Some(callscribe_core::Transcript::from_text(text)),
            ..payload(id, "done")
        }
    }

    #[tokio::test]
    async fn idle_sweep_makes_no_vendor_calls() {
        let h = harness();

        let summary = h.sweeper.sweep().await.unwrap();

        assert_eq!(summary, SweepSummary::default());
        assert_eq!(h.counting.count_active_calls(), 1);
        assert_eq!(h.counting.list_active_calls(), 0);
        assert_eq!(h.vendor.calls(), 0);
    }

    #[tokio::test]
    async fn vendor_error_on_one_job_does_not_block_another() {
        let h = harness();
        seed(&h, "A", 5);
        let rb = seed(&h, "B", 5);
        h.vendor.fail("A", PipelineError::vendor_unavailable("503 from vendor"));
        h.vendor.respond("B", done("B", "all good"));

        let summary = h.sweeper.sweep().await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].job_id.as_deref(), Some("A"));

        let recording = h.store.get_recording(rb).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Processing);
    }

    #[tokio::test]
    async fn old_processing_job_is_flagged_stale_but_stays_active() {
        let h = harness();
        let r = seed(&h, "S", 31);
        h.vendor.respond("S", payload("S", "processing"));

        let summary = h.sweeper.sweep().await.unwrap();

        assert_eq!(summary.still_processing, 1);
        assert_eq!(summary.stale, 1);
        let stored = h.store.get_job(&job("S")).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
        let recording = h.store.get_recording(r).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Transcribing);
    }

    #[tokio::test]
    async fn vendor_failure_marks_recording_failed_without_analysis() {
        let h = harness();
        let r2 = seed(&h, "J2", 5);
        h.vendor.respond(
            "J2",
            VendorPayload {
                error: Some("audio corrupted".into()),
                ..payload("J2", "error")
            },
        );

        let summary = h.sweeper.sweep().await.unwrap();
        assert_eq!(summary.failed, 1);

        let recording = h.store.get_recording(r2).await.unwrap().unwrap();
        assert_eq!(recording.status, RecordingStatus::Failed);
        assert_eq!(recording.error_message.as_deref(), Some("audio corrupted"));
        assert_eq!(h.tasks.stats().unwrap().pending, 0);

        let key = ProjectionKey::new(ExternalBotId::parse("bot-J2").unwrap(), "meetingbaas");
        let row = h.projections.get(&key).await.unwrap().unwrap();
        assert_eq!(row.processing_status, ProjectionStatus::Failed);
        assert!(row.transcript_text.is_none());
    }

    #[tokio::test]
    async fn completed_jobs_drop_out_of_the_next_sweep() {
        let h = harness();
        seed(&h, "J1", 1);
        h.vendor.respond("J1", done("J1", "hello world"));

        let first = h.sweeper.sweep().await.unwrap();
        assert_eq!(first.completed, 1);
        assert_eq!(h.vendor.calls(), 1);

        let second = h.sweeper.sweep().await.unwrap();
        assert_eq!(second.total, 0);
        assert_eq!(h.vendor.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_vendor_status_is_quarantined_per_job() {
        let h = harness();
        seed(&h, "Q", 1);
        seed(&h, "OK", 1);
        h.vendor.respond("Q", payload("Q", "finished"));
        h.vendor.respond("OK", payload("OK", "queued"));

        let summary = h.sweeper.sweep().await.unwrap();

        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].error.contains("finished"));
        assert_eq!(summary.still_processing, 1);
        let stored = h.store.get_job(&job("Q")).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Queued);
    }

    #[tokio::test]
    async fn batch_limit_caps_vendor_calls() {
        let store = Arc::new(InMemoryRecordingStore::new());
        let vendor = Arc::new(ScriptedVendorClient::new());
        let pipeline = Pipeline::new(
            store.clone(),
            ProjectionSync::new(Arc::new(InMemoryProjectionStore::new()), "meetingbaas"),
            AnalysisTrigger::new(Arc::new(InMemoryTaskStore::new()), RetryPolicy::default()),
        );
        let sweeper = PollSweeper::new(
            store.clone(),
            vendor.clone(),
            pipeline,
            SweepConfig {
                batch_limit: 2,
                max_concurrency: 1,
                ..SweepConfig::default()
            },
        );
        for (i, name) in ["J1", "J2", "J3"].iter().enumerate() {
            let id = RecordingId::new();
            store.insert_recording(Recording::transcribing(id, job(name))).unwrap();
            store
                .register_job(TranscriptionJob::queued(
                    job(name),
                    id,
                    Utc::now() - chrono::Duration::minutes(10 - i as i64),
                ))
                .unwrap();
            vendor.respond(name, payload(name, "processing"));
        }

        let summary = sweeper.sweep().await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(vendor.calls(), 2);
        assert_eq!(vendor.polled(), vec!["J1".to_string(), "J2".to_string()]);
    }
}
