use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
};

use crate::types::TimeRange;

const TRANSCRIPT_SUFFIX: &str = "srt";
const FILTERED_SUFFIX: &str = "filtered.srt";
const TRANSLATED_SUFFIX: &str = "translated.srt";

/// Stable short hash of a video path, used to make task ids traceable
pub fn subject_hash(video: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    video.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn sibling(video: &Path, stem_suffix: Option<&str>, suffix: &str) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let name = match stem_suffix {
        Some(extra) => format!("{}.{}.{}", stem, extra, suffix),
        None => format!("{}.{}", stem, suffix),
    };
    video.with_file_name(name)
}

/// `{startMs}-{endMs}` tag used in chunk file names and task ids
pub fn range_tag(range: &TimeRange) -> String {
    format!(
        "{}-{}",
        (range.start_seconds * 1000.0).round() as u64,
        (range.end_seconds * 1000.0).round() as u64
    )
}

/// Artifact file locations for one unit of work.
///
/// Whole-video artifacts sit next to the video with the same basename;
/// chunk artifacts add the millisecond range to the stem so that chunks
/// never share an output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub transcript: PathBuf,
    pub filtered: PathBuf,
    pub translated: PathBuf,
}

impl ArtifactPaths {
    pub fn for_video(video: &Path) -> Self {
        Self {
            transcript: transcript_path(video),
            filtered: filtered_path(video),
            translated: translated_path(video),
        }
    }

    pub fn for_chunk(video: &Path, range: &TimeRange) -> Self {
        let tag = range_tag(range);
        Self {
            transcript: sibling(video, Some(&tag), TRANSCRIPT_SUFFIX),
            filtered: sibling(video, Some(&tag), FILTERED_SUFFIX),
            translated: sibling(video, Some(&tag), TRANSLATED_SUFFIX),
        }
    }

    /// Language pair the translated file was produced with.
    pub fn translation_languages(&self) -> PathBuf {
        self.translated.with_extension("json")
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.transcript, &self.filtered, &self.translated]
    }
}

/// Get the path for the raw transcript of a video
pub fn transcript_path(video: &Path) -> PathBuf {
    sibling(video, None, TRANSCRIPT_SUFFIX)
}

/// Get the path for the vocabulary-filtered subtitles of a video
pub fn filtered_path(video: &Path) -> PathBuf {
    sibling(video, None, FILTERED_SUFFIX)
}

/// Get the path for the selectively translated subtitles of a video
pub fn translated_path(video: &Path) -> PathBuf {
    sibling(video, None, TRANSLATED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_video_paths_share_basename() {
        let video = Path::new("/media/serie/folge01.mp4");
        let paths = ArtifactPaths::for_video(video);

        assert_eq!(paths.transcript, PathBuf::from("/media/serie/folge01.srt"));
        assert_eq!(
            paths.filtered,
            PathBuf::from("/media/serie/folge01.filtered.srt")
        );
        assert_eq!(
            paths.translated,
            PathBuf::from("/media/serie/folge01.translated.srt")
        );
    }

    #[test]
    fn test_chunk_paths_carry_range() {
        let video = Path::new("/media/folge01.mkv");
        let range = TimeRange {
            start_seconds: 60.0,
            end_seconds: 120.5,
        };
        let paths = ArtifactPaths::for_chunk(video, &range);

        assert_eq!(paths.transcript, PathBuf::from("/media/folge01.60000-120500.srt"));
        assert_eq!(
            paths.translated,
            PathBuf::from("/media/folge01.60000-120500.translated.srt")
        );
        assert_eq!(
            paths.translation_languages(),
            PathBuf::from("/media/folge01.60000-120500.translated.json")
        );
    }

    #[test]
    fn test_subject_hash_is_stable_and_distinct() {
        let a = subject_hash(Path::new("/a.mp4"));
        assert_eq!(a, subject_hash(Path::new("/a.mp4")));
        assert_ne!(a, subject_hash(Path::new("/b.mp4")));
        assert_eq!(a.len(), 16);
    }
}
