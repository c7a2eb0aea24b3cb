use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::errors::pipeline_error_to_response;
use crate::app::services::AppServices;

/// Run one sweep on demand and return its summary.
pub async fn run_sweep(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.sweeper.sweep().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "on-demand sweep failed");
            pipeline_error_to_response(e)
        }
    }
}
