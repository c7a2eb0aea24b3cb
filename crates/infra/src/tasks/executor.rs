//! Background executor delivering analysis tasks with retry and backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{TaskStore, TaskStoreError};
use super::types::{AnalysisTask, TaskStatus};
use crate::analysis::AnalysisClient;

#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    /// Idle wait between empty polls of the queue.
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            name: "analysis-executor".to_string(),
        }
    }
}

impl TaskExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            tasks_processed: self.processed.load(Ordering::Relaxed),
            tasks_succeeded: self.succeeded.load(Ordering::Relaxed),
            tasks_failed: self.failed.load(Ordering::Relaxed),
            tasks_dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
    Succeeded,
    /// Failed; will be retried after backoff.
    Retrying { error: String },
    DeadLettered { error: String },
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct TaskExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl TaskExecutorHandle {
    /// Request shutdown and wait for the in-flight task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "task executor panicked");
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }
}

/// Drains the task queue, calling the analysis collaborator.
#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn AnalysisClient>,
    counters: Arc<Counters>,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn TaskStore>, client: Arc<dyn AnalysisClient>) -> Self {
        Self {
            store,
            client,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Claim and run the next ready task, if any.
    pub async fn run_once(&self) -> Result<Option<TaskRunOutcome>, TaskStoreError> {
        let Some(mut task) = self.store.claim_next(Utc::now())? else {
            return Ok(None);
        };
        debug!(task_id = %task.id, attempt = task.attempt, "claimed analysis task");
        self.execute(&mut task).await.map(Some)
    }

    async fn execute(&self, task: &mut AnalysisTask) -> Result<TaskRunOutcome, TaskStoreError> {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        match self.client.analyze(&task.request).await {
            Ok(()) => {
                task.mark_completed(Utc::now());
                self.store.update(task)?;
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(
                    task_id = %task.id,
                    recording_id = %task.request.recording_id,
                    "analysis delivered"
                );
                Ok(TaskRunOutcome::Succeeded)
            }
            Err(e) => {
                let error = e.to_string();
                task.mark_failed(error.clone(), Utc::now());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);

                if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                    warn!(
                        task_id = %task.id,
                        recording_id = %task.request.recording_id,
                        attempts = task.attempt,
                        error = %error,
                        "analysis task dead-lettered"
                    );
                    self.store.dead_letter(task.clone(), error.clone())?;
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    Ok(TaskRunOutcome::DeadLettered { error })
                } else {
                    warn!(
                        task_id = %task.id,
                        recording_id = %task.request.recording_id,
                        attempt = task.attempt,
                        error = %error,
                        "analysis attempt failed; will retry"
                    );
                    self.store.update(task)?;
                    Ok(TaskRunOutcome::Retrying { error })
                }
            }
        }
    }

    /// Run the executor loop on the tokio runtime until shut down.
    pub fn spawn(self, config: TaskExecutorConfig) -> TaskExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = self.counters.clone();
        let join = tokio::spawn(executor_loop(self, config, shutdown_rx));

        TaskExecutorHandle {
            shutdown: shutdown_tx,
            join,
            counters,
        }
    }
}

async fn executor_loop(
    executor: TaskExecutor,
    config: TaskExecutorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(executor = %config.name, "task executor started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match executor.run_once().await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to run analysis task");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!(executor = %config.name, "task executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::{AnalysisRequest, RetryPolicy};
    use crate::tasks::InMemoryTaskStore;
    use crate::testing::RecordingAnalysisClient;
    use callscribe_core::{RecordingId, VendorJobId};

    fn enqueue(store: &InMemoryTaskStore, policy: RetryPolicy) -> RecordingId {
        let recording_id = RecordingId::new();
        let task = AnalysisTask::new(
            AnalysisRequest {
                recording_id,
                external_bot_id: None,
            },
            &VendorJobId::parse("J1").unwrap(),
            Utc::now(),
        )
        .with_retry_policy(policy);
        store.enqueue(task).unwrap();
        recording_id
    }

    #[tokio::test]
    async fn delivers_task_to_client() {
        let store = Arc::new(InMemoryTaskStore::new());
        let client = Arc::new(RecordingAnalysisClient::new());
        let recording_id = enqueue(&store, RetryPolicy::default());

        let executor = TaskExecutor::new(store.clone(), client.clone());
        assert_eq!(executor.run_once().await.unwrap(), Some(TaskRunOutcome::Succeeded));
        assert_eq!(executor.run_once().await.unwrap(), None);

        let delivered = client.requests();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recording_id, recording_id);
        assert_eq!(store.stats().unwrap().completed, 1);
    }

    #[tokio::test]
    async fn failing_task_retries_then_dead_letters() {
        let store = Arc::new(InMemoryTaskStore::new());
        let client = Arc::new(RecordingAnalysisClient::failing("analysis down"));
        enqueue(&store, RetryPolicy::fixed(2, Duration::ZERO));

        let executor = TaskExecutor::new(store.clone(), client.clone());
        assert!(matches!(
            executor.run_once().await.unwrap(),
            Some(TaskRunOutcome::Retrying { .. })
        ));
        assert!(matches!(
            executor.run_once().await.unwrap(),
            Some(TaskRunOutcome::DeadLettered { .. })
        ));
        assert_eq!(executor.run_once().await.unwrap(), None);

        assert_eq!(client.calls(), 2);
        assert_eq!(store.list_dead_letters(10).unwrap().len(), 1);
        let stats = executor.stats();
        assert_eq!(stats.tasks_failed, 2);
        assert_eq!(stats.tasks_dead_lettered, 1);
    }

    #[tokio::test]
    async fn spawned_executor_drains_queue_and_stops() {
        let store = Arc::new(InMemoryTaskStore::new());
        let client = Arc::new(RecordingAnalysisClient::new());
        enqueue(&store, RetryPolicy::default());
        enqueue(&store, RetryPolicy::default());

        let handle = TaskExecutor::new(store.clone(), client.clone())
            .spawn(TaskExecutorConfig::default().with_poll_interval(Duration::from_millis(10)));

        for _ in 0..100 {
            if handle.stats().tasks_succeeded == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(handle.stats().tasks_succeeded, 2);
        handle.shutdown().await;
        assert_eq!(store.stats().unwrap().completed, 2);
    }
}
