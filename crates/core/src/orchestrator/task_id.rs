use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    artifacts::{range_tag, subject_hash},
    orchestrator::Operation,
    registry::TaskId,
    types::TimeRange,
};

/// Builds `{operation}_{subjectHash}_{range|none}_{timestamp}` ids.
///
/// The timestamp is milliseconds since the epoch, bumped so that it strictly
/// increases within one generator.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: AtomicU64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn next(&self, operation: Operation, video: &Path, range: Option<&TimeRange>) -> TaskId {
        let range = range.map(range_tag).unwrap_or_else(|| "none".to_string());
        TaskId::new(format!(
            "{}_{}_{}_{}",
            operation.as_str(),
            subject_hash(video),
            range,
            self.next_timestamp()
        ))
    }
}
