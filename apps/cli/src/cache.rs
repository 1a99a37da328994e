use std::path::{Path, PathBuf};

use tokio::{fs, process::Command};

use crate::error::{CliError, Result};

pub const MODEL_NAME: &str = "ggml-base.bin";

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sublingo")
}

pub fn get_model_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("models")
}

/// Scratch location for the audio extracted from one video (or one range of it)
pub fn get_audio_path(cache_dir: &Path, video: &Path, range_tag: &str) -> PathBuf {
    cache_dir.join("audio").join(format!(
        "{}-{}.wav",
        sublingo_core::artifacts::subject_hash(video),
        range_tag
    ))
}

/// Download the default Whisper model into the cache unless it is already there.
pub async fn ensure_model(cache_dir: &Path) -> Result<PathBuf> {
    let download_url = format!(
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
        MODEL_NAME
    );
    let model_dir = get_model_dir(cache_dir);

    if !model_dir.exists() {
        fs::create_dir_all(&model_dir).await?;
    }

    let model_path = model_dir.join(MODEL_NAME);
    if !model_path.exists() {
        tracing::info!(url = %download_url, "downloading whisper model");
        let output = Command::new("curl")
            .arg("-L")
            .arg("--fail")
            .arg(&download_url)
            .arg("-o")
            .arg(&model_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CliError::ModelDownloadFailed {
                url: download_url,
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
    }

    Ok(model_path)
}
