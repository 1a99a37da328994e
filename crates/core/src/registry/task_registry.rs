use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    error::RegistryError,
    registry::{ProgressRecord, ProgressUpdate, TaskId, TaskStatus},
};

struct Entry {
    record: ProgressRecord,
    updated_at: Instant,
    finished_at: Option<Instant>,
}

/// Process-wide table of task progress.
///
/// Cloning is cheap and every clone sees the same tasks. One lock guards
/// the whole map; it is only held for a single map operation and never
/// across an `.await`.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<TaskId, Entry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.inner.lock().expect("TaskRegistry poisoned")
    }

    pub fn create(
        &self,
        task_id: TaskId,
        operation: impl Into<String>,
    ) -> Result<ProgressRecord, RegistryError> {
        let mut entries = self.entries();
        if entries.contains_key(&task_id) {
            return Err(RegistryError::DuplicateTask(task_id.to_string()));
        }

        let record = ProgressRecord::queued(task_id.clone(), operation);
        entries.insert(
            task_id,
            Entry {
                record: record.clone(),
                updated_at: Instant::now(),
                finished_at: None,
            },
        );
        tracing::debug!(task_id = %record.task_id, operation = %record.operation, "task created");
        Ok(record)
    }

    pub fn update(
        &self,
        task_id: &str,
        update: ProgressUpdate,
    ) -> Result<ProgressRecord, RegistryError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))?;

        let was_terminal = entry.record.is_terminal();
        let next = entry.record.merged(&update)?;
        if was_terminal {
            return Ok(next);
        }

        let now = Instant::now();
        if next.is_terminal() {
            entry.finished_at = Some(now);
        }
        entry.updated_at = now;
        entry.record = next.clone();
        Ok(next)
    }

    /// Current record for `task_id`.
    ///
    /// Unknown ids yield [`ProgressRecord::missing`], a completed stand-in,
    /// rather than an error.
    pub fn get(&self, task_id: &str) -> ProgressRecord {
        self.try_get(task_id)
            .unwrap_or_else(|| ProgressRecord::missing(task_id))
    }

    pub fn try_get(&self, task_id: &str) -> Option<ProgressRecord> {
        self.entries().get(task_id).map(|e| e.record.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries().contains_key(task_id)
    }

    pub fn snapshot(&self) -> Vec<ProgressRecord> {
        let mut records: Vec<ProgressRecord> =
            self.entries().values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        records
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop terminal records that finished at least `older_than` ago.
    pub fn reap(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| match entry.finished_at {
            Some(finished) => now.duration_since(finished) < older_than,
            None => true,
        });
        let reaped = before - entries.len();
        if reaped > 0 {
            tracing::info!(reaped, remaining = entries.len(), "reaped finished tasks");
        }
        reaped
    }

    /// Fail every processing task whose last update is at least `window` old.
    pub fn fail_stalled(&self, window: Duration) -> Vec<TaskId> {
        let now = Instant::now();
        let mut entries = self.entries();
        let mut stalled = Vec::new();

        for (task_id, entry) in entries.iter_mut() {
            if entry.record.status != TaskStatus::Processing {
                continue;
            }
            let idle = now.duration_since(entry.updated_at);
            if idle < window {
                continue;
            }

            let update = ProgressUpdate::failed(
                entry.record.current_step.clone(),
                format!(
                    "stalled: no progress for {}s during {}",
                    idle.as_secs(),
                    entry.record.current_step
                ),
            );
            match entry.record.merged(&update) {
                Ok(next) => {
                    tracing::warn!(task_id = %task_id, step = %next.current_step, "task stalled");
                    entry.record = next;
                    entry.updated_at = now;
                    entry.finished_at = Some(now);
                    stalled.push(task_id.clone());
                }
                Err(e) => tracing::error!(task_id = %task_id, error = %e, "cannot fail stalled task"),
            }
        }

        stalled
    }
}
