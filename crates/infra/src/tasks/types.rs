//! Analysis task types and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use callscribe_core::{ExternalBotId, RecordingId, VendorJobId};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload handed to the downstream analysis collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub recording_id: RecordingId,
    pub external_bot_id: Option<ExternalBotId>,
}

/// Dedup key for the analysis of one recording's transcript from one vendor job.
pub fn idempotency_key(recording_id: RecordingId, job_id: &VendorJobId) -> String {
    format!("analysis:{recording_id}:{job_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    /// Failed, waiting for its backoff to elapse.
    Failed { error: String, attempt: u32 },
    DeadLettered { error: String, attempts: u32 },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLettered { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// base * 2^(attempt - 1), capped at `max_delay`.
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the task is dead-lettered.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before retrying after `attempt` (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2_u32.saturating_pow(attempt - 1);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A queued hand-off to the downstream analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub idempotency_key: String,
    pub request: AnalysisRequest,
    pub status: TaskStatus,
    pub retry_policy: RetryPolicy,
    /// Attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the task may run again.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AnalysisTask {
    pub fn new(request: AnalysisRequest, job_id: &VendorJobId, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            idempotency_key: idempotency_key(request.recording_id, job_id),
            request,
            status: TaskStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            last_error: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Failed { .. })
            && self.scheduled_at.is_none_or(|at| now >= at)
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.scheduled_at = None;
        self.updated_at = now;
    }

    /// Record a failed attempt; schedules a retry or dead-letters the task.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.updated_at = now;
        self.last_error = Some(error.clone());

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = TaskStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.scheduled_at = None;
            self.status = TaskStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: AnalysisTask,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(policy: RetryPolicy) -> AnalysisTask {
        AnalysisTask::new(
            AnalysisRequest {
                recording_id: RecordingId::new(),
                external_bot_id: None,
            },
            &VendorJobId::parse("J1").unwrap(),
            Utc::now(),
        )
        .with_retry_policy(policy)
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn key_names_recording_and_job() {
        let id = RecordingId::new();
        let key = idempotency_key(id, &VendorJobId::parse("J9").unwrap());
        assert_eq!(key, format!("analysis:{id}:J9"));
    }

    #[test]
    fn request_serializes_camel_case() {
        let id = RecordingId::new();
        let request = AnalysisRequest {
            recording_id: id,
            external_bot_id: Some(ExternalBotId::parse("bot-1").unwrap()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["recordingId"], id.to_string());
        assert_eq!(json["externalBotId"], "bot-1");
    }

    #[test]
    fn failure_schedules_retry_then_dead_letters() {
        let mut task = task(RetryPolicy::fixed(2, Duration::from_secs(10)));
        let now = Utc::now();

        task.mark_running(now);
        task.mark_failed("boom".into(), now);
        assert!(matches!(task.status, TaskStatus::Failed { attempt: 1, .. }));
        assert!(!task.is_ready(now));
        assert!(task.is_ready(now + chrono::Duration::seconds(10)));

        task.mark_running(now);
        task.mark_failed("boom again".into(), now);
        assert!(matches!(task.status, TaskStatus::DeadLettered { attempts: 2, .. }));
        assert_eq!(task.last_error.as_deref(), Some("boom again"));
        assert!(!task.is_ready(now + chrono::Duration::days(1)));
    }
}
