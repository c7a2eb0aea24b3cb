//! Postgres-backed meeting projection (`meeting_projections` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use callscribe_core::{MediaUrls, MeetingProjection, ProjectionKey, ProjectionStatus, ProjectionUpdate};

use super::ProjectionStore;
use crate::store::postgres::map_sqlx_error;
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct PostgresProjectionStore {
    pool: Arc<PgPool>,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    async fn get(&self, key: &ProjectionKey) -> Result<Option<MeetingProjection>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT transcript_text, transcript_json, duration_minutes, processing_status,
                   error_message, video_url, audio_url, thumbnail_url, updated_at
            FROM meeting_projections
            WHERE bot_id = $1 AND source_type = $2
            "#,
        )
        .bind(key.bot_id.as_str())
        .bind(&key.source_type)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("projection.get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let get = |e: sqlx::Error| map_sqlx_error("projection_row", e);
        let status: String = row.try_get("processing_status").map_err(get)?;

        Ok(Some(MeetingProjection {
            key: key.clone(),
            transcript_text: row.try_get("transcript_text").map_err(get)?,
            transcript_json: row.try_get("transcript_json").map_err(get)?,
            duration_minutes: row.try_get("duration_minutes").map_err(get)?,
            processing_status: status
                .parse::<ProjectionStatus>()
                .map_err(|e| StoreError::Storage(e.to_string()))?,
            error_message: row.try_get("error_message").map_err(get)?,
            media: MediaUrls {
                video_url: row.try_get("video_url").map_err(get)?,
                audio_url: row.try_get("audio_url").map_err(get)?,
                thumbnail_url: row.try_get("thumbnail_url").map_err(get)?,
            },
            updated_at: row.try_get("updated_at").map_err(get)?,
        }))
    }

    #[instrument(skip(self, update), fields(key = %key))]
    async fn update(
        &self,
        key: &ProjectionKey,
        update: &ProjectionUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = match update {
            ProjectionUpdate::TranscriptReady {
                transcript_text,
                transcript_json,
                duration_minutes,
                media,
            } => {
                let copy_media = media.is_some();
                let media = media.clone().unwrap_or_default();
                sqlx::query(
                    r#"
                    UPDATE meeting_projections
                    SET transcript_text = $3,
                        transcript_json = $4,
                        duration_minutes = COALESCE($5, duration_minutes),
                        processing_status = 'processing',
                        error_message = NULL,
                        video_url = CASE WHEN $6 THEN $7 ELSE video_url END,
                        audio_url = CASE WHEN $6 THEN $8 ELSE audio_url END,
                        thumbnail_url = CASE WHEN $6 THEN $9 ELSE thumbnail_url END,
                        updated_at = $10
                    WHERE bot_id = $1 AND source_type = $2
                    "#,
                )
                .bind(key.bot_id.as_str())
                .bind(&key.source_type)
                .bind(transcript_text)
                .bind(transcript_json)
                .bind(*duration_minutes)
                .bind(copy_media)
                .bind(media.video_url)
                .bind(media.audio_url)
                .bind(media.thumbnail_url)
                .bind(at)
                .execute(&*self.pool)
                .await
            }
            ProjectionUpdate::Failed { message } => {
                sqlx::query(
                    r#"
                    UPDATE meeting_projections
                    SET processing_status = 'failed', error_message = $3, updated_at = $4
                    WHERE bot_id = $1 AND source_type = $2
                    "#,
                )
                .bind(key.bot_id.as_str())
                .bind(&key.source_type)
                .bind(message)
                .bind(at)
                .execute(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("projection.update", e))?;

        Ok(result.rows_affected() > 0)
    }
}
