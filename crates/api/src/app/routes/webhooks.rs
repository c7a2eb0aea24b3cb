use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use callscribe_core::{signal::parse_signal, ExternalBotId, RecordingId, SignalSource};

use crate::app::errors::{json_error, pipeline_error_to_response};
use crate::app::services::AppServices;
use crate::signature;

/// Correlation ids the vendor echoes back on the callback URL.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub recording_id: Option<String>,
    pub bot_id: Option<String>,
}

/// `POST /webhooks/transcription?recording_id=<uuid>&bot_id=<id>`
pub async fn transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if let Some(secret) = services.callback_secret.as_deref() {
        let provided = headers
            .get(signature::SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = provided.is_some_and(|sig| signature::verify(secret, &body, sig));
        if !valid {
            tracing::warn!(
                recording_id = query.recording_id.as_deref().unwrap_or(""),
                "webhook rejected: invalid signature"
            );
            return json_error(
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "missing or invalid X-Callback-Signature",
            );
        }
    }

    let recording_id = match query.recording_id.as_deref().map(str::parse::<RecordingId>) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "webhook rejected: bad recording_id");
            return pipeline_error_to_response(e);
        }
        None => {
            tracing::warn!("webhook rejected: missing recording_id");
            return json_error(
                StatusCode::BAD_REQUEST,
                "malformed_signal",
                "recording_id query parameter is required",
            );
        }
    };
    let bot_id = query.bot_id.and_then(|b| ExternalBotId::parse(b).ok());

    let signal = match parse_signal(&body) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(recording_id = %recording_id, error = %e, "webhook rejected: malformed body");
            return pipeline_error_to_response(e);
        }
    };

    match services
        .pipeline
        .apply_signal(recording_id, bot_id.as_ref(), &signal, SignalSource::Webhook)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                recording_id = %recording_id,
                job_id = %signal.job_id,
                status = signal.kind.status().as_str(),
                outcome = outcome.as_str(),
                "webhook processed"
            );
            (StatusCode::OK, Json(json!({ "outcome": outcome.as_str() }))).into_response()
        }
        Err(e) => {
            tracing::warn!(
                recording_id = %recording_id,
                job_id = %signal.job_id,
                error = %e,
                "webhook failed"
            );
            pipeline_error_to_response(e)
        }
    }
}
