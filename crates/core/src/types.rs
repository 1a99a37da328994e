use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleSegment {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

/// Half-open `[start, end)` window on a video's timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl TimeRange {
    pub fn contains(&self, seconds: f64) -> bool {
        seconds >= self.start_seconds && seconds < self.end_seconds
    }

    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Languages {
    pub source: String,
    pub target: String,
}

impl Languages {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl Default for Languages {
    fn default() -> Self {
        Self::new("de", "en")
    }
}

/// Output artifacts embedded in a completed task's record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_path: Option<PathBuf>,
    #[serde(default)]
    pub vocabulary: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_is_half_open() {
        let range = TimeRange {
            start_seconds: 10.0,
            end_seconds: 20.0,
        };
        assert!(range.contains(10.0));
        assert!(range.contains(19.999));
        assert!(!range.contains(20.0));
        assert!(!range.contains(9.999));
        assert_eq!(range.duration(), 10.0);
    }

    #[test]
    fn test_segment_json_uses_camel_case() {
        let seg = SubtitleSegment {
            index: 1,
            start_seconds: 0.0,
            end_seconds: 1.5,
            text: "Hallo".to_string(),
            translation: None,
        };
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["startSeconds"], 0.0);
        assert_eq!(json["endSeconds"], 1.5);
        assert!(json.get("translation").is_none());
    }
}
