pub mod filter;
pub mod transcribe;
pub mod translate;

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, time};
use tokio_util::sync::CancellationToken;

pub use filter::FilterStage;
pub use transcribe::TranscribeStage;
pub use translate::{PreviousTranslation, TranslateStage, apply_selective_translation};

use crate::{
    artifacts::ArtifactPaths,
    config::StageWeights,
    error::StageError,
    registry::{ProgressUpdate, TaskId, TaskRegistry},
    srt,
    types::{Languages, SubtitleSegment, TimeRange},
    vocabulary::KnownWordSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Transcribe,
    Filter,
    Translate,
}

impl StageKind {
    pub const PIPELINE: [StageKind; 3] = [
        StageKind::Transcribe,
        StageKind::Filter,
        StageKind::Translate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StageKind::Transcribe => "transcribe",
            StageKind::Filter => "filter",
            StageKind::Translate => "translate",
        }
    }

    pub fn weight(self, weights: &StageWeights) -> f64 {
        match self {
            StageKind::Transcribe => weights.transcribe,
            StageKind::Filter => weights.filter,
            StageKind::Translate => weights.translate,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(StageKind::Transcribe),
            "filter" => Ok(StageKind::Filter),
            "translate" => Ok(StageKind::Translate),
            other => Err(format!("unknown stage {:?}", other)),
        }
    }
}

/// Everything a stage needs to know about the unit of work it runs for.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub video: PathBuf,
    pub range: Option<TimeRange>,
    pub paths: ArtifactPaths,
    pub languages: Languages,
    /// Supplied by the caller for this submission only
    pub known_words: Arc<KnownWordSet>,
}

impl StageJob {
    pub fn whole_video(video: &Path, languages: Languages, known_words: KnownWordSet) -> Self {
        Self {
            video: video.to_path_buf(),
            range: None,
            paths: ArtifactPaths::for_video(video),
            languages,
            known_words: Arc::new(known_words),
        }
    }

    pub fn chunk(
        video: &Path,
        range: TimeRange,
        languages: Languages,
        known_words: KnownWordSet,
    ) -> Self {
        Self {
            video: video.to_path_buf(),
            range: Some(range),
            paths: ArtifactPaths::for_chunk(video, &range),
            languages,
            known_words: Arc::new(known_words),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub artifact: PathBuf,
    pub vocabulary: Vec<String>,
}

/// Progress and cancellation handle passed to a running stage.
///
/// Percent written by [`StageContext::report`] is
/// `floor(100 * (base + local * weight))`, so consecutive stages join up
/// without going backwards.
pub struct StageContext {
    task_id: TaskId,
    stage: StageKind,
    registry: TaskRegistry,
    cancel: CancellationToken,
    base: f64,
    weight: f64,
    batch_size: usize,
}

impl StageContext {
    pub fn new(
        task_id: TaskId,
        stage: StageKind,
        registry: TaskRegistry,
        cancel: CancellationToken,
        base: f64,
        weight: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            task_id,
            stage,
            registry,
            cancel,
            base,
            weight,
            batch_size: batch_size.max(1),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation check point
    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    pub fn percent_at(&self, local: f64) -> f64 {
        let local = if local.is_finite() {
            local.clamp(0.0, 1.0)
        } else {
            0.0
        };
        // absorb float noise such as 0.5 + 0.2 = 0.69999…
        (100.0 * (self.base + local * self.weight) + 1e-9).floor()
    }

    /// Record stage-local progress (`0.0..=1.0`).
    pub fn report(&self, local: f64, message: impl Into<String>) -> Result<(), StageError> {
        let message = message.into();
        let percent = self.percent_at(local);
        tracing::debug!(task_id = %self.task_id, stage = %self.stage, percent, %message, "progress");
        self.registry.update(
            self.task_id.as_str(),
            ProgressUpdate::processing(self.stage.label(), message).with_percent(percent),
        )?;
        Ok(())
    }

    /// Await `call`, re-reporting `local` progress every [`HEARTBEAT`] until
    /// it returns. Used around long capability calls that report nothing.
    pub async fn heartbeat<F: Future>(&self, local: f64, message: &str, call: F) -> F::Output {
        let started = time::Instant::now();
        let mut ticker = time::interval_at(started + HEARTBEAT, HEARTBEAT);
        let mut call = std::pin::pin!(call);

        loop {
            tokio::select! {
                out = &mut call => return out,
                _ = ticker.tick() => {
                    let message = format!("{} ({}s)", message, started.elapsed().as_secs());
                    if let Err(e) = self.report(local, message) {
                        tracing::debug!(task_id = %self.task_id, error = %e, "heartbeat not recorded");
                    }
                }
            }
        }
    }
}

/// How often [`StageContext::heartbeat`] refreshes the progress record.
pub const HEARTBEAT: Duration = Duration::from_secs(30);

/// One replaceable step of the pipeline.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> StageKind;

    async fn execute(&self, job: &StageJob, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

pub(crate) async fn read_segments(path: &Path) -> Result<Vec<SubtitleSegment>, StageError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| StageError::io(path, e))?;
    srt::parse(&raw).map_err(|source| StageError::Subtitle {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) async fn write_segments(
    path: &Path,
    segments: &[SubtitleSegment],
) -> Result<(), StageError> {
    replace_file(path, srt::serialize(segments).as_bytes()).await
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to a scratch sibling, then rename it over `path`.
///
/// Readers see either the old file or the new one, never a partial write.
pub(crate) async fn replace_file(path: &Path, contents: &[u8]) -> Result<(), StageError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let scratch = path.with_file_name(format!(
        ".{}.{}-{}.part",
        name,
        std::process::id(),
        SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = fs::write(&scratch, contents).await {
        let _ = fs::remove_file(&scratch).await;
        return Err(StageError::io(&scratch, e));
    }
    if let Err(e) = fs::rename(&scratch, path).await {
        let _ = fs::remove_file(&scratch).await;
        return Err(StageError::io(path, e));
    }
    Ok(())
}
