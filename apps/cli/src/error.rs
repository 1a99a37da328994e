use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Audio extraction failed for {video_path}: {reason}")]
    AudioExtractionFailed { video_path: PathBuf, reason: String },

    #[error("Transcription failed for {audio_path}: {reason}")]
    TranscriptFailed { audio_path: PathBuf, reason: String },

    #[error("Model download failed from {url}: {reason}")]
    ModelDownloadFailed { url: String, reason: String },

    #[error("Translation failed: {reason}")]
    TranslationFailed { reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("WAV read error: {0}")]
    WavError(#[from] hound::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
