use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::{error::RegistryError, types::TaskResult};

/// Highest percent a task may report before it completes.
pub const MAX_IN_FLIGHT_PERCENT: f64 = 99.0;

pub const MISSING_TASK_MESSAGE: &str = "task not found or already reaped";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    fn can_move_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Queued => true,
            TaskStatus::Processing => next != TaskStatus::Queued,
            _ => self == next,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub task_id: TaskId,
    pub operation: String,
    pub status: TaskStatus,
    pub percent: f64,
    pub current_step: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    pub fn queued(task_id: TaskId, operation: impl Into<String>) -> Self {
        Self {
            task_id,
            operation: operation.into(),
            status: TaskStatus::Queued,
            percent: 0.0,
            current_step: "queued".to_string(),
            message: "waiting for a worker".to_string(),
            result: None,
            error: None,
        }
    }

    /// Stand-in returned for ids the registry does not know.
    ///
    /// Reporting unknown ids as completed stops pollers that show up after
    /// a task was reaped from spinning forever. It also means a mistyped id
    /// looks finished.
    pub fn missing(task_id: &str) -> Self {
        Self {
            task_id: TaskId::new(task_id),
            operation: "unknown".to_string(),
            status: TaskStatus::Completed,
            percent: 100.0,
            current_step: "done".to_string(),
            message: MISSING_TASK_MESSAGE.to_string(),
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge an update into a copy of this record.
    pub(crate) fn merged(&self, update: &ProgressUpdate) -> Result<ProgressRecord, RegistryError> {
        let next_status = update.status.unwrap_or(self.status);

        if self.is_terminal() {
            let mut unchanged = self.clone();
            update.overwrite_fields(&mut unchanged);
            if unchanged == *self {
                return Ok(unchanged);
            }
            return Err(RegistryError::InvalidTransition {
                task_id: self.task_id.to_string(),
                from: self.status,
                to: next_status,
            });
        }

        if !self.status.can_move_to(next_status) {
            return Err(RegistryError::InvalidTransition {
                task_id: self.task_id.to_string(),
                from: self.status,
                to: next_status,
            });
        }

        let mut next = self.clone();
        next.status = next_status;
        if let Some(step) = &update.current_step {
            next.current_step = step.clone();
        }
        if let Some(message) = &update.message {
            next.message = message.clone();
        }

        next.percent = match next_status {
            TaskStatus::Completed => 100.0,
            _ => {
                let requested = update
                    .percent
                    .filter(|p| p.is_finite())
                    .unwrap_or(self.percent)
                    .clamp(0.0, MAX_IN_FLIGHT_PERCENT);
                requested.max(self.percent)
            }
        };

        next.result = match next_status {
            TaskStatus::Completed => update.result.clone(),
            _ => None,
        };
        next.error = match next_status {
            TaskStatus::Failed => update.error.clone().or_else(|| self.error.clone()),
            _ => None,
        };

        Ok(next)
    }
}

/// Partial set of fields to merge into a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<TaskStatus>,
    pub percent: Option<f64>,
    pub current_step: Option<String>,
    pub message: Option<String>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub fn processing(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            current_step: Some(step.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: TaskResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            current_step: Some("done".to_string()),
            message: Some("all stages finished".to_string()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        let step = step.into();
        let error = error.into();
        Self {
            status: Some(TaskStatus::Failed),
            message: Some(format!("{} failed", step)),
            current_step: Some(step),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Cancelled),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    fn overwrite_fields(&self, record: &mut ProgressRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(percent) = self.percent {
            record.percent = percent;
        }
        if let Some(step) = &self.current_step {
            record.current_step = step.clone();
        }
        if let Some(message) = &self.message {
            record.message = message.clone();
        }
        if self.result.is_some() {
            record.result = self.result.clone();
        }
        if self.error.is_some() {
            record.error = self.error.clone();
        }
    }
}
