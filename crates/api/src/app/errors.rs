use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use callscribe_core::PipelineError;

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    let status = match &err {
        PipelineError::MalformedSignal(_) => StatusCode::BAD_REQUEST,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::VendorUnavailable(_) => StatusCode::BAD_GATEWAY,
        PipelineError::VendorTerminalError(_)
        | PipelineError::DownstreamTriggerFailure(_)
        | PipelineError::ProjectionSyncFailure(_)
        | PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
