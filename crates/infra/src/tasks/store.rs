//! Task storage.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::types::{AnalysisTask, DeadLetterEntry, TaskId, TaskStatus};

/// Task store abstraction.
///
/// Enqueue is idempotent on `AnalysisTask::idempotency_key`: a key seen
/// before (queued, finished, or dead-lettered) is never enqueued twice.
pub trait TaskStore: Send + Sync {
    fn enqueue(&self, task: AnalysisTask) -> Result<EnqueueOutcome, TaskStoreError>;

    fn get(&self, id: TaskId) -> Result<Option<AnalysisTask>, TaskStoreError>;

    /// Write back a task. A `Completed` task leaves the queue; only its
    /// idempotency key is retained.
    fn update(&self, task: &AnalysisTask) -> Result<(), TaskStoreError>;

    /// Claim the oldest ready task and mark it running.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<AnalysisTask>, TaskStoreError>;

    /// Move a task out of the queue into the dead-letter list.
    fn dead_letter(&self, task: AnalysisTask, reason: String) -> Result<(), TaskStoreError>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TaskStoreError>;

    /// Put a dead-lettered task back in the queue with a fresh attempt budget.
    fn retry_dead_letter(&self, id: TaskId) -> Result<AnalysisTask, TaskStoreError>;

    fn stats(&self) -> Result<TaskStats, TaskStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(TaskId),
    /// A task with the same idempotency key already exists.
    Duplicate(TaskId),
}

impl EnqueueOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, AnalysisTask>,
    dead_letters: HashMap<TaskId, DeadLetterEntry>,
    keys: HashMap<String, TaskId>,
    completed: usize,
}

/// In-memory task queue for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, TaskStoreError> {
        self.inner
            .read()
            .map_err(|_| TaskStoreError::Storage("task store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, TaskStoreError> {
        self.inner
            .write()
            .map_err(|_| TaskStoreError::Storage("task store lock poisoned".to_string()))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn enqueue(&self, task: AnalysisTask) -> Result<EnqueueOutcome, TaskStoreError> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.keys.get(&task.idempotency_key) {
            return Ok(EnqueueOutcome::Duplicate(*existing));
        }
        let id = task.id;
        inner.keys.insert(task.idempotency_key.clone(), id);
        inner.tasks.insert(id, task);
        Ok(EnqueueOutcome::Enqueued(id))
    }

    fn get(&self, id: TaskId) -> Result<Option<AnalysisTask>, TaskStoreError> {
        let inner = self.read()?;
        Ok(inner
            .tasks
            .get(&id)
            .cloned()
            .or_else(|| inner.dead_letters.get(&id).map(|e| e.task.clone())))
    }

    fn update(&self, task: &AnalysisTask) -> Result<(), TaskStoreError> {
        let mut inner = self.write()?;
        if !inner.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::NotFound(task.id));
        }

        if task.status == TaskStatus::Completed {
            inner.tasks.remove(&task.id);
            inner.completed += 1;
        } else {
            inner.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<AnalysisTask>, TaskStoreError> {
        let mut inner = self.write()?;
        let next = inner
            .tasks
            .values()
            .filter(|t| t.is_ready(now))
            .min_by_key(|t| (t.created_at, t.id.0))
            .map(|t| t.id);

        Ok(next.and_then(|id| {
            inner.tasks.get_mut(&id).map(|task| {
                task.mark_running(now);
                task.clone()
            })
        }))
    }

    fn dead_letter(&self, mut task: AnalysisTask, reason: String) -> Result<(), TaskStoreError> {
        let mut inner = self.write()?;
        let now = Utc::now();
        task.status = TaskStatus::DeadLettered {
            error: reason.clone(),
            attempts: task.attempt,
        };
        task.updated_at = now;

        inner.tasks.remove(&task.id);
        inner.dead_letters.insert(
            task.id,
            DeadLetterEntry {
                task,
                dead_lettered_at: now,
                reason,
            },
        );
        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        let inner = self.read()?;
        let mut entries: Vec<_> = inner.dead_letters.values().cloned().collect();
        entries.sort_by_key(|e| e.dead_lettered_at);
        entries.truncate(limit);
        Ok(entries)
    }

    fn retry_dead_letter(&self, id: TaskId) -> Result<AnalysisTask, TaskStoreError> {
        let mut inner = self.write()?;
        let entry = inner
            .dead_letters
            .remove(&id)
            .ok_or(TaskStoreError::NotFound(id))?;

        let mut task = entry.task;
        task.status = TaskStatus::Pending;
        task.attempt = 0;
        task.scheduled_at = None;
        task.updated_at = Utc::now();

        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let inner = self.read()?;
        let mut stats = TaskStats::default();

        for task in inner.tasks.values() {
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }
        stats.completed += inner.completed;
        stats.dead_lettered += inner.dead_letters.len();

        Ok(stats)
    }
}
