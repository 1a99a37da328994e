use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    artifacts::transcript_path,
    capabilities::{SpeechToText, TranscribeRequest},
    chunk::{ChunkSpec, segments_in_range},
    error::StageError,
    srt,
    stages::{StageContext, StageExecutor, StageJob, StageKind, StageOutput, read_segments, write_segments},
    types::SubtitleSegment,
};

/// Video → SRT.
///
/// For a chunk job, an existing whole-video transcript is sliced (read only)
/// instead of running recognition again.
pub struct TranscribeStage {
    speech: Arc<dyn SpeechToText>,
}

impl TranscribeStage {
    pub fn new(speech: Arc<dyn SpeechToText>) -> Self {
        Self { speech }
    }

    async fn recognize(
        &self,
        job: &StageJob,
        ctx: &StageContext,
    ) -> Result<Vec<SubtitleSegment>, StageError> {
        let request = TranscribeRequest {
            video: job.video.clone(),
            range: job.range,
            language: job.languages.source.clone(),
        };
        let message = format!("transcribing with {}", self.speech.name());
        ctx.report(0.0, message.as_str())?;
        let raw = ctx
            .heartbeat(0.0, &message, self.speech.transcribe(&request))
            .await
            .map_err(|source| StageError::Capability {
                capability: "speech-to-text",
                source,
            })?;

        srt::parse(&raw).map_err(|source| StageError::Subtitle {
            path: job.paths.transcript.clone(),
            source,
        })
    }
}

#[async_trait]
impl StageExecutor for TranscribeStage {
    fn stage(&self) -> StageKind {
        StageKind::Transcribe
    }

    async fn execute(&self, job: &StageJob, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.checkpoint()?;

        let shared = transcript_path(&job.video);
        let segments = match job.range {
            Some(range) if shared.exists() && shared != job.paths.transcript => {
                ctx.report(0.0, "slicing existing transcript")?;
                let all = read_segments(&shared).await?;
                let chunk = ChunkSpec {
                    video_ref: job.video.clone(),
                    start_seconds: range.start_seconds,
                    end_seconds: range.end_seconds,
                };
                segments_in_range(&all, &chunk)
            }
            _ => {
                let recognized = self.recognize(job, ctx).await?;
                match job.range {
                    Some(range) => recognized
                        .into_iter()
                        .filter(|seg| range.contains(seg.start_seconds))
                        .collect(),
                    None => recognized,
                }
            }
        };

        write_segments(&job.paths.transcript, &segments).await?;
        tracing::info!(
            task_id = %ctx.task_id(),
            segments = segments.len(),
            path = %job.paths.transcript.display(),
            "transcript written"
        );
        ctx.report(1.0, format!("transcript ready: {} segments", segments.len()))?;
        ctx.checkpoint()?;

        Ok(StageOutput {
            artifact: job.paths.transcript.clone(),
            vocabulary: Vec::new(),
        })
    }
}
