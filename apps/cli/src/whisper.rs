use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sublingo_core::{
    SpeechToText, SubtitleSegment, TimeRange, TranscribeRequest, artifacts::range_tag, srt,
};
use tokio::{fs, process::Command};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::{
    cache::{ensure_model, get_audio_path, get_root_cache_dir},
    error::{CliError, Result},
};

/// Shortest cue written for a zero-length Whisper segment.
const MIN_CUE_SECONDS: f64 = 0.1;

/// Extract 16 kHz mono PCM audio from video using ffmpeg
pub async fn extract_audio(
    video_path: &Path,
    range: Option<&TimeRange>,
    audio_path: &Path,
) -> Result<()> {
    if let Some(parent) = audio_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut command = Command::new("ffmpeg");
    command.arg("-y");
    if let Some(range) = range {
        command
            .arg("-ss")
            .arg(format!("{:.3}", range.start_seconds))
            .arg("-to")
            .arg(format!("{:.3}", range.end_seconds));
    }
    let output = command
        .arg("-i")
        .arg(video_path)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(audio_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(CliError::AudioExtractionFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Raw Whisper segment: start and end in seconds relative to the audio, text.
pub type RawSegment = (f64, f64, String);

fn run_whisper(
    model_path: &Path,
    audio_path: &Path,
    language: &str,
    use_gpu: bool,
) -> Result<Vec<RawSegment>> {
    let failed = |reason: String| CliError::TranscriptFailed {
        audio_path: audio_path.to_path_buf(),
        reason,
    };

    let mut reader = hound::WavReader::open(audio_path)?;
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect::<std::result::Result<_, _>>()?;

    let ctx_params = WhisperContextParameters {
        use_gpu,
        flash_attn: use_gpu,
        ..Default::default()
    };
    let model = model_path.to_string_lossy();
    let ctx = WhisperContext::new_with_params(&model, ctx_params)
        .map_err(|e| failed(format!("cannot load model {}: {}", model, e)))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    params.set_language(Some(language));
    params.set_print_progress(false);
    params.set_print_realtime(false);

    let mut state = ctx
        .create_state()
        .map_err(|e| failed(format!("cannot create state: {}", e)))?;
    state
        .full(params, &samples)
        .map_err(|e| failed(format!("inference failed: {}", e)))?;

    let mut segments = Vec::new();
    for segment in state.as_iter() {
        let text = match segment.to_str() {
            Ok(s) => s.trim().to_string(),
            Err(_) => continue,
        };
        segments.push((
            segment.start_timestamp() as f64 / 100.0,
            segment.end_timestamp() as f64 / 100.0,
            text,
        ));
    }

    Ok(segments)
}

/// Render Whisper output as SRT with timestamps shifted by `offset_seconds`.
///
/// Empty segments are skipped and every cue ends after it starts.
pub fn render_srt(raw: &[RawSegment], offset_seconds: f64) -> String {
    let segments: Vec<SubtitleSegment> = raw
        .iter()
        .filter(|(_, _, text)| !text.trim().is_empty())
        .enumerate()
        .map(|(i, (start, end, text))| {
            let start = (start + offset_seconds).max(0.0);
            let end = (end + offset_seconds).max(start + MIN_CUE_SECONDS);
            SubtitleSegment {
                index: i + 1,
                start_seconds: start,
                end_seconds: end,
                text: text.trim().to_string(),
                translation: None,
            }
        })
        .collect();
    srt::serialize(&segments)
}

/// Speech-to-text through a local whisper.cpp model.
pub struct WhisperSpeechToText {
    model: Option<PathBuf>,
    use_gpu: bool,
    cache_dir: PathBuf,
}

impl WhisperSpeechToText {
    /// Without a model path the default model is downloaded on first use.
    pub fn new(model: Option<PathBuf>, use_gpu: bool) -> Self {
        Self {
            model,
            use_gpu,
            cache_dir: get_root_cache_dir(),
        }
    }

    async fn model_path(&self) -> Result<PathBuf> {
        match &self.model {
            Some(path) => Ok(path.clone()),
            None => ensure_model(&self.cache_dir).await,
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperSpeechToText {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, request: &TranscribeRequest) -> anyhow::Result<String> {
        let model_path = self.model_path().await?;
        let tag = request
            .range
            .as_ref()
            .map(range_tag)
            .unwrap_or_else(|| "none".to_string());
        let audio_path = get_audio_path(&self.cache_dir, &request.video, &tag);

        extract_audio(&request.video, request.range.as_ref(), &audio_path).await?;
        tracing::debug!(audio = %audio_path.display(), "audio extracted");

        let language = request.language.clone();
        let use_gpu = self.use_gpu;
        let audio = audio_path.clone();
        let raw = tokio::task::spawn_blocking(move || {
            run_whisper(&model_path, &audio, &language, use_gpu)
        })
        .await??;

        if let Err(e) = fs::remove_file(&audio_path).await {
            tracing::debug!(error = %e, "could not remove scratch audio");
        }

        let offset = request.range.map_or(0.0, |r| r.start_seconds);
        Ok(render_srt(&raw, offset))
    }
}
