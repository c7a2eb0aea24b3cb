//! Postgres-backed job record store.
//!
//! Schema lives in `migrations/0001_transcription_pipeline.sql`.
//!
//! ## Conditional commit
//!
//! `commit()` runs in one transaction:
//! 1. `UPDATE transcription_jobs ... WHERE state = $expected AND state NOT IN ('done','error')`
//! 2. if no row matched, roll back and report `Stale` with the state found
//! 3. otherwise update the recording and return it (`RETURNING`)
//!
//! Two concurrent deliveries of the same terminal signal therefore produce a
//! single `Applied`; row locking on step 1 serializes them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use callscribe_core::{
    ExternalBotId, JobState, MediaUrls, Recording, RecordingId, RecordingPatch, RecordingStatus,
    TranscriptionJob, VendorJobId,
};

use super::{Commit, CommitOutcome, RecordingStore, StoreError};

const RECORDING_COLUMNS: &str = r#"
    id, status, upload_complete, transcription_job_id, external_bot_id,
    transcript_text, transcript_json, duration_seconds, word_count, speaker_count,
    error_message, video_url, audio_url, thumbnail_url, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresRecordingStore {
    pool: Arc<PgPool>,
}

impl PostgresRecordingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn current_state(
        tx: &mut Transaction<'_, Postgres>,
        job_id: &VendorJobId,
    ) -> Result<JobState, StoreError> {
        let row = sqlx::query("SELECT state FROM transcription_jobs WHERE job_id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("current_state", e))?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

        let state: String = row
            .try_get("state")
            .map_err(|e| map_sqlx_error("current_state", e))?;
        state.parse().map_err(|e: callscribe_core::PipelineError| StoreError::Storage(e.to_string()))
    }
}

#[async_trait]
impl RecordingStore for PostgresRecordingStore {
    #[instrument(skip(self))]
    async fn count_active(&self) -> Result<usize, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS active
            FROM recordings
            WHERE status = 'transcribing' AND transcription_job_id IS NOT NULL
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_active", e))?;

        let active: i64 = row
            .try_get("active")
            .map_err(|e| map_sqlx_error("count_active", e))?;
        Ok(active.max(0) as usize)
    }

    #[instrument(skip(self))]
    async fn list_active(&self, limit: usize) -> Result<Vec<TranscriptionJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT j.job_id, j.recording_id, j.state, j.started_at, j.updated_at, j.error_message
            FROM recordings r
            JOIN transcription_jobs j ON j.job_id = r.transcription_job_id
            WHERE r.status = 'transcribing' AND r.transcription_job_id IS NOT NULL
            ORDER BY j.started_at ASC, j.job_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active", e))?;

        rows.iter().map(job_from_row).collect()
    }

    async fn get_job(&self, job_id: &VendorJobId) -> Result<Option<TranscriptionJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, recording_id, state, started_at, updated_at, error_message
            FROM transcription_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_recording(&self, id: RecordingId) -> Result<Option<Recording>, StoreError> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_recording", e))?;

        row.as_ref().map(recording_from_row).transpose()
    }

    #[instrument(skip(self, commit), fields(job_id = %commit.job_id, recording_id = %commit.recording_id))]
    async fn commit(&self, commit: Commit) -> Result<CommitOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("commit.begin", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET state = $4,
                error_message = CASE WHEN $4 = 'error' THEN $5 ELSE error_message END,
                updated_at = $6
            WHERE job_id = $1
              AND recording_id = $2
              AND state = $3
              AND state NOT IN ('done', 'error')
            "#,
        )
        .bind(commit.job_id.as_str())
        .bind(commit.recording_id.as_uuid())
        .bind(commit.expected.as_str())
        .bind(commit.next.as_str())
        .bind(commit.error_message.as_deref())
        .bind(commit.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("commit.job", e))?;

        if updated.rows_affected() == 0 {
            let current = Self::current_state(&mut tx, &commit.job_id).await?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("commit.rollback", e))?;
            return Ok(CommitOutcome::Stale { current });
        }

        let row = match &commit.patch {
            RecordingPatch::Unchanged => {
                let sql = format!(
                    "UPDATE recordings SET updated_at = $2 WHERE id = $1 RETURNING {RECORDING_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(commit.recording_id.as_uuid())
                    .bind(commit.at)
                    .fetch_optional(&mut *tx)
                    .await
            }
            RecordingPatch::TranscriptCaptured(t) => {
                let sql = format!(
                    r#"
                    UPDATE recordings
                    SET status = 'processing',
                        transcript_text = $2,
                        transcript_json = $3,
                        duration_seconds = COALESCE($4, duration_seconds),
                        word_count = $5,
                        speaker_count = $6,
                        error_message = NULL,
                        updated_at = $7
                    WHERE id = $1
                    RETURNING {RECORDING_COLUMNS}
                    "#
                );
                sqlx::query(&sql)
                    .bind(commit.recording_id.as_uuid())
                    .bind(&t.text)
                    .bind(&t.json)
                    .bind(t.duration_seconds)
                    .bind(t.word_count as i32)
                    .bind(t.speaker_count as i32)
                    .bind(commit.at)
                    .fetch_optional(&mut *tx)
                    .await
            }
            RecordingPatch::Failed { message } => {
                let sql = format!(
                    r#"
                    UPDATE recordings
                    SET status = 'failed', error_message = $2, updated_at = $3
                    WHERE id = $1
                    RETURNING {RECORDING_COLUMNS}
                    "#
                );
                sqlx::query(&sql)
                    .bind(commit.recording_id.as_uuid())
                    .bind(message)
                    .bind(commit.at)
                    .fetch_optional(&mut *tx)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("commit.recording", e))?
        .ok_or_else(|| StoreError::NotFound(format!("recording {}", commit.recording_id)))?;

        let recording = recording_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit.commit", e))?;

        Ok(CommitOutcome::Applied(recording))
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<TranscriptionJob, StoreError> {
    let job_id: String = row.try_get("job_id").map_err(|e| map_sqlx_error("job_row", e))?;
    let recording_id: uuid::Uuid = row
        .try_get("recording_id")
        .map_err(|e| map_sqlx_error("job_row", e))?;
    let state: String = row.try_get("state").map_err(|e| map_sqlx_error("job_row", e))?;
    let started_at: DateTime<Utc> = row
        .try_get("started_at")
        .map_err(|e| map_sqlx_error("job_row", e))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| map_sqlx_error("job_row", e))?;
    let error_message: Option<String> = row
        .try_get("error_message")
        .map_err(|e| map_sqlx_error("job_row", e))?;

    Ok(TranscriptionJob {
        job_id: VendorJobId::parse(job_id).map_err(|e| StoreError::Storage(e.to_string()))?,
        recording_id: RecordingId::from_uuid(recording_id),
        state: state.parse().map_err(|e: callscribe_core::PipelineError| StoreError::Storage(e.to_string()))?,
        started_at,
        updated_at,
        error_message,
    })
}

fn recording_from_row(row: &sqlx::postgres::PgRow) -> Result<Recording, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("recording_row", e);

    let id: uuid::Uuid = row.try_get("id").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let job_id: Option<String> = row.try_get("transcription_job_id").map_err(get)?;
    let bot_id: Option<String> = row.try_get("external_bot_id").map_err(get)?;
    let word_count: Option<i32> = row.try_get("word_count").map_err(get)?;
    let speaker_count: Option<i32> = row.try_get("speaker_count").map_err(get)?;

    Ok(Recording {
        id: RecordingId::from_uuid(id),
        status: status
            .parse::<RecordingStatus>()
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        upload_complete: row.try_get("upload_complete").map_err(get)?,
        transcription_job_id: job_id.and_then(|j| VendorJobId::parse(j).ok()),
        external_bot_id: bot_id.and_then(|b| ExternalBotId::parse(b).ok()),
        transcript_text: row.try_get("transcript_text").map_err(get)?,
        transcript_json: row.try_get("transcript_json").map_err(get)?,
        duration_seconds: row.try_get("duration_seconds").map_err(get)?,
        word_count: word_count.map(|w| w.max(0) as u32),
        speaker_count: speaker_count.map(|s| s.max(0) as u32),
        error_message: row.try_get("error_message").map_err(get)?,
        media: MediaUrls {
            video_url: row.try_get("video_url").map_err(get)?,
            audio_url: row.try_get("audio_url").map_err(get)?,
            thumbnail_url: row.try_get("thumbnail_url").map_err(get)?,
        },
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
