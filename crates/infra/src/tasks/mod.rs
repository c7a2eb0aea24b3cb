//! Analysis task queue with retry, backoff, and dead-letter handling.
//!
//! - Tasks are deduplicated by idempotency key at enqueue time
//! - Failed deliveries are retried with capped backoff
//! - Tasks exhausting their attempts move to a dead-letter list and can be re-queued

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, TaskExecutor, TaskExecutorConfig, TaskExecutorHandle, TaskRunOutcome};
pub use store::{EnqueueOutcome, InMemoryTaskStore, TaskStats, TaskStore, TaskStoreError};
pub use types::{
    AnalysisRequest, AnalysisTask, BackoffStrategy, DeadLetterEntry, RetryPolicy, TaskId, TaskStatus,
    idempotency_key,
};
