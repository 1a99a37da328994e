use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    types::{SubtitleSegment, TimeRange},
};

/// One schedulable slice of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSpec {
    pub video_ref: PathBuf,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl ChunkSpec {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_seconds: self.start_seconds,
            end_seconds: self.end_seconds,
        }
    }
}

/// Check a `[start, end)` window: `start >= 0` and `end > start`, both finite.
pub fn validate_range(start_seconds: f64, end_seconds: f64) -> Result<TimeRange, ValidationError> {
    let valid = start_seconds.is_finite()
        && end_seconds.is_finite()
        && start_seconds >= 0.0
        && end_seconds > start_seconds;
    if !valid {
        return Err(ValidationError::InvalidRange {
            start: start_seconds,
            end: end_seconds,
        });
    }
    Ok(TimeRange {
        start_seconds,
        end_seconds,
    })
}

pub fn plan(
    video_ref: impl AsRef<Path>,
    start_seconds: f64,
    end_seconds: f64,
) -> Result<ChunkSpec, ValidationError> {
    let range = validate_range(start_seconds, end_seconds)?;
    Ok(ChunkSpec {
        video_ref: video_ref.as_ref().to_path_buf(),
        start_seconds: range.start_seconds,
        end_seconds: range.end_seconds,
    })
}

/// Segments whose start time falls inside the chunk.
///
/// A segment that starts before the chunk but runs into it belongs to the
/// earlier chunk only.
pub fn segments_in_range(all: &[SubtitleSegment], chunk: &ChunkSpec) -> Vec<SubtitleSegment> {
    let range = chunk.range();
    all.iter()
        .filter(|seg| range.contains(seg.start_seconds))
        .cloned()
        .collect()
}

/// Split `[0, duration)` into consecutive chunks of at most `chunk_seconds`.
pub fn partition(
    video_ref: impl AsRef<Path>,
    duration_seconds: f64,
    chunk_seconds: f64,
) -> Result<Vec<ChunkSpec>, ValidationError> {
    validate_range(0.0, duration_seconds)?;
    validate_range(0.0, chunk_seconds)?;

    let mut chunks = Vec::new();
    let mut start = 0.0;
    while start < duration_seconds {
        let end = (start + chunk_seconds).min(duration_seconds);
        chunks.push(plan(video_ref.as_ref(), start, end)?);
        start = end;
    }
    Ok(chunks)
}
