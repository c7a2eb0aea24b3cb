//! Service wiring: stores, collaborators, pipeline and sweeper, built once
//! from `Config` and shared with every handler.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use callscribe_infra::analysis::{AnalysisClient, AnalysisTrigger, HttpAnalysisClient};
use callscribe_infra::projections::{
    InMemoryProjectionStore, PostgresProjectionStore, ProjectionStore, ProjectionSync,
};
use callscribe_infra::store::{InMemoryRecordingStore, PostgresRecordingStore, RecordingStore};
use callscribe_infra::tasks::{InMemoryTaskStore, TaskExecutor, TaskStore};
use callscribe_infra::vendor::{HttpVendorClient, VendorClient};
use callscribe_infra::{Config, Pipeline, PollSweeper};

/// Everything a handler needs.
#[derive(Clone)]
pub struct AppServices {
    pub recordings: Arc<dyn RecordingStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub pipeline: Pipeline,
    pub sweeper: PollSweeper,
    pub callback_secret: Option<String>,
    pub sweep_token: Option<String>,
}

/// Store backends chosen at startup.
pub struct Stores {
    pub recordings: Arc<dyn RecordingStore>,
    pub projections: Arc<dyn ProjectionStore>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            recordings: Arc::new(InMemoryRecordingStore::new()),
            projections: Arc::new(InMemoryProjectionStore::new()),
            tasks: Arc::new(InMemoryTaskStore::new()),
        }
    }
}

impl AppServices {
    pub fn new(config: &Config, stores: Stores, vendor: Arc<dyn VendorClient>) -> Self {
        let pipeline = Pipeline::new(
            stores.recordings.clone(),
            ProjectionSync::new(stores.projections, config.projection_source_type.clone()),
            AnalysisTrigger::new(stores.tasks.clone(), config.analysis_retry_policy()),
        );
        let sweeper = PollSweeper::new(
            stores.recordings.clone(),
            vendor,
            pipeline.clone(),
            config.sweep_config(),
        );

        Self {
            recordings: stores.recordings,
            tasks: stores.tasks,
            pipeline,
            sweeper,
            callback_secret: config.callback_secret.clone(),
            sweep_token: config.sweep_token.clone(),
        }
    }

    /// Executor delivering queued analysis tasks to `client`.
    pub fn task_executor(&self, client: Arc<dyn AnalysisClient>) -> TaskExecutor {
        TaskExecutor::new(self.tasks.clone(), client)
    }
}

/// Build production services: Postgres when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let stores = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            tracing::info!("using postgres stores");
            Stores {
                recordings: Arc::new(PostgresRecordingStore::new(pool.clone())),
                projections: Arc::new(PostgresProjectionStore::new(pool)),
                // TODO: Postgres-backed TaskStore so queued analysis survives restarts.
                tasks: Arc::new(InMemoryTaskStore::new()),
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let vendor = HttpVendorClient::new(
        config.vendor_base_url.clone(),
        config.vendor_api_key.clone(),
        config.vendor_timeout,
    )?;

    Ok(AppServices::new(config, stores, Arc::new(vendor)))
}

pub fn build_analysis_client(config: &Config) -> anyhow::Result<Arc<dyn AnalysisClient>> {
    let client = HttpAnalysisClient::new(config.analysis_url.clone(), config.vendor_timeout)?;
    Ok(Arc::new(client))
}
