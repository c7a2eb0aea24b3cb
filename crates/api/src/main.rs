use std::sync::Arc;

use anyhow::Context;

use callscribe_infra::tasks::TaskExecutorConfig;
use callscribe_infra::{Config, SweepScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    callscribe_observability::init();

    let config = Config::from_env()?;
    let services = Arc::new(callscribe_api::app::services::build_services(&config).await?);

    let analysis = callscribe_api::app::services::build_analysis_client(&config)?;
    let executor = services.task_executor(analysis).spawn(TaskExecutorConfig::default());
    let scheduler = SweepScheduler::new(services.sweeper.clone(), config.sweep_interval).spawn();

    let app = callscribe_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    scheduler.shutdown().await;
    executor.shutdown().await;
    Ok(())
}
