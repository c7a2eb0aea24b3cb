use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use callscribe_core::{ExternalBotId, PipelineError, ProjectionKey, ProjectionUpdate, Recording};

use super::ProjectionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated(ProjectionKey),
    /// The recording is not tied to a meeting bot.
    NoBot,
    /// No projection row exists yet for the bot.
    NoRow(ProjectionKey),
    /// The recording's status has nothing to mirror.
    NothingToMirror,
}

/// Mirrors committed recordings into the meeting projection.
#[derive(Clone)]
pub struct ProjectionSync {
    store: Arc<dyn ProjectionStore>,
    source_type: String,
}

impl ProjectionSync {
    pub fn new(store: Arc<dyn ProjectionStore>, source_type: impl Into<String>) -> Self {
        Self {
            store,
            source_type: source_type.into(),
        }
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Copy the committed recording's transcription fields into its projection row.
    ///
    /// `recording` must be the state returned by the store commit. The stored
    /// bot id wins over `fallback_bot` (the id carried on the callback URL).
    pub async fn sync(
        &self,
        recording: &Recording,
        fallback_bot: Option<&ExternalBotId>,
    ) -> Result<SyncOutcome, PipelineError> {
        let Some(bot_id) = recording.external_bot_id.as_ref().or(fallback_bot) else {
            debug!(recording_id = %recording.id, "no bot id; projection sync skipped");
            return Ok(SyncOutcome::NoBot);
        };

        let Some(update) = ProjectionUpdate::from_recording(recording) else {
            return Ok(SyncOutcome::NothingToMirror);
        };

        let key = ProjectionKey::new(bot_id.clone(), self.source_type.clone());
        let found = self
            .store
            .update(&key, &update, Utc::now())
            .await
            .map_err(|e| PipelineError::ProjectionSyncFailure(e.to_string()))?;

        if found {
            debug!(recording_id = %recording.id, key = %key, "projection updated");
            Ok(SyncOutcome::Updated(key))
        } else {
            debug!(recording_id = %recording.id, key = %key, "no projection row; skipped");
            Ok(SyncOutcome::NoRow(key))
        }
    }
}
