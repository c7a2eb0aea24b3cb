//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, collaborators, pipeline and sweeper
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::system::health))
        .route("/webhooks/transcription", post(routes::webhooks::transcription));

    // Internal routes exist only when a token is configured.
    match services.sweep_token.as_deref() {
        Some(token) => {
            let auth = middleware::SweepAuth {
                token: Arc::from(token),
            };
            let internal = Router::new()
                .route("/internal/sweep", post(routes::sweep::run_sweep))
                .route_layer(axum::middleware::from_fn_with_state(
                    auth,
                    middleware::sweep_auth_middleware,
                ));
            app = app.merge(internal);
        }
        None => tracing::info!("SWEEP_TOKEN not set; /internal/sweep disabled"),
    }

    app.layer(Extension(services)).layer(ServiceBuilder::new())
}
