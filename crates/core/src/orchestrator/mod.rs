//! Drives tasks through their stages and keeps the registry in step.
//!
//! Every `submit_*` call validates its input, creates the registry entry and
//! spawns a worker. It returns as soon as the worker is spawned; callers
//! then poll [`Orchestrator::poll_progress`].

pub mod supervisor;
pub mod task_id;

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::{fs, task::JoinError};
use tokio_util::sync::CancellationToken;

pub use supervisor::SweepReport;
pub use task_id::TaskIdGenerator;

use crate::{
    artifacts::ArtifactPaths,
    capabilities::Capabilities,
    chunk::{ChunkSpec, validate_range},
    config::PipelineConfig,
    error::{StageError, ValidationError},
    registry::{ProgressRecord, ProgressUpdate, TaskId, TaskRegistry},
    srt,
    stages::{
        FilterStage, StageContext, StageExecutor, StageJob, StageKind, TranscribeStage,
        TranslateStage,
    },
    types::{Languages, TaskResult},
    vocabulary::KnownWordSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Pipeline,
    Transcribe,
    Filter,
    Translate,
    Chunk,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Pipeline => "pipeline",
            Operation::Transcribe => "transcribe",
            Operation::Filter => "filter",
            Operation::Translate => "translate",
            Operation::Chunk => "chunk",
        }
    }
}

impl From<StageKind> for Operation {
    fn from(stage: StageKind) -> Self {
        match stage {
            StageKind::Transcribe => Operation::Transcribe,
            StageKind::Filter => Operation::Filter,
            StageKind::Translate => Operation::Translate,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller hands over for one submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub video: PathBuf,
    pub languages: Languages,
    pub known_words: KnownWordSet,
}

impl JobRequest {
    pub fn new(video: impl Into<PathBuf>, languages: Languages, known_words: KnownWordSet) -> Self {
        Self {
            video: video.into(),
            languages,
            known_words,
        }
    }
}

struct PlannedStage {
    kind: StageKind,
    base: f64,
    weight: f64,
}

struct Plan {
    task_id: TaskId,
    operation: Operation,
    job: StageJob,
    stages: Vec<PlannedStage>,
    /// Artifacts that already exist and are reported as part of the result
    reused: TaskResult,
}

struct StageSet {
    transcribe: Arc<dyn StageExecutor>,
    filter: Arc<dyn StageExecutor>,
    translate: Arc<dyn StageExecutor>,
}

impl StageSet {
    fn get(&self, kind: StageKind) -> &Arc<dyn StageExecutor> {
        match kind {
            StageKind::Transcribe => &self.transcribe,
            StageKind::Filter => &self.filter,
            StageKind::Translate => &self.translate,
        }
    }

    fn set(&mut self, executor: Arc<dyn StageExecutor>) {
        match executor.stage() {
            StageKind::Transcribe => self.transcribe = executor,
            StageKind::Filter => self.filter = executor,
            StageKind::Translate => self.translate = executor,
        }
    }
}

/// A task whose worker has not finished yet.
struct LiveTask {
    cancel: CancellationToken,
    /// Files this task writes; no other live task may write them
    paths: ArtifactPaths,
}

impl LiveTask {
    fn claims(&self, paths: &ArtifactPaths) -> Option<&Path> {
        self.paths
            .all()
            .into_iter()
            .find(|own| paths.all().contains(own))
    }
}

struct Inner {
    registry: TaskRegistry,
    config: PipelineConfig,
    stages: StageSet,
    live: Mutex<HashMap<TaskId, LiveTask>>,
    ids: TaskIdGenerator,
}

/// Cheap to clone; all clones share the registry and running tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(registry: TaskRegistry, capabilities: Capabilities, config: PipelineConfig) -> Self {
        let stages = StageSet {
            transcribe: Arc::new(TranscribeStage::new(capabilities.speech.clone())),
            filter: Arc::new(FilterStage::new(capabilities.oracle.clone())),
            translate: Arc::new(TranslateStage::new(
                capabilities.translator.clone(),
                capabilities.oracle.clone(),
            )),
        };
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                stages,
                live: Mutex::new(HashMap::new()),
                ids: TaskIdGenerator::new(),
            }),
        }
    }

    /// Replace the executor for the stage it reports. Only valid before the
    /// orchestrator is cloned.
    pub fn with_stage(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.stages.set(executor),
            None => tracing::warn!(stage = %executor.stage(), "orchestrator already shared, stage not replaced"),
        }
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, LiveTask>> {
        self.inner.live.lock().expect("Orchestrator live tasks poisoned")
    }

    /// Ids of tasks whose worker is still running.
    pub fn live_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.live().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Transcribe, filter and translate a whole video.
    ///
    /// An existing transcript is reused: the transcribe stage is skipped and
    /// progress starts at the filter stage.
    pub async fn submit_full_pipeline(&self, request: JobRequest) -> Result<TaskId, ValidationError> {
        require_file(&request.video)?;
        let job = StageJob::whole_video(&request.video, request.languages, request.known_words);
        let task_id = self.inner.ids.next(Operation::Pipeline, &job.video, None);
        let plan = self.pipeline_plan(task_id, Operation::Pipeline, job).await?;
        self.launch(plan)
    }

    /// Run exactly one stage on artifacts that already exist.
    pub async fn submit_stage(
        &self,
        stage: StageKind,
        request: JobRequest,
    ) -> Result<TaskId, ValidationError> {
        let job = StageJob::whole_video(&request.video, request.languages, request.known_words);
        match stage {
            StageKind::Transcribe => require_file(&job.video)?,
            StageKind::Filter => require_subtitles(stage, &job.paths.transcript).await?,
            StageKind::Translate => require_subtitles(stage, &job.paths.filtered).await?,
        }

        let operation = Operation::from(stage);
        let plan = Plan {
            task_id: self.inner.ids.next(operation, &job.video, None),
            operation,
            job,
            stages: vec![PlannedStage {
                kind: stage,
                base: 0.0,
                weight: 1.0,
            }],
            reused: TaskResult::default(),
        };
        self.launch(plan)
    }

    /// Run the full pipeline over the segments starting inside `chunk`.
    pub async fn submit_chunk(
        &self,
        chunk: ChunkSpec,
        languages: Languages,
        known_words: KnownWordSet,
    ) -> Result<TaskId, ValidationError> {
        let range = validate_range(chunk.start_seconds, chunk.end_seconds)?;
        require_file(&chunk.video_ref)?;

        let job = StageJob::chunk(&chunk.video_ref, range, languages, known_words);
        let task_id = self.inner.ids.next(Operation::Chunk, &job.video, Some(&range));
        let plan = self.pipeline_plan(task_id, Operation::Chunk, job).await?;
        self.launch(plan)
    }

    /// Re-run only the translate stage against the filtered subtitles, with
    /// the known words supplied in `request`.
    pub async fn apply_selective_translation(
        &self,
        request: JobRequest,
    ) -> Result<TaskId, ValidationError> {
        self.submit_stage(StageKind::Translate, request).await
    }

    /// Ask a task to stop at its next check point.
    ///
    /// Returns `false` when the task is unknown or already finished.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.live().get(task_id) {
            Some(task) => {
                task.cancel.cancel();
                tracing::info!(task_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn poll_progress(&self, task_id: &str) -> ProgressRecord {
        self.inner.registry.get(task_id)
    }

    async fn pipeline_plan(
        &self,
        task_id: TaskId,
        operation: Operation,
        job: StageJob,
    ) -> Result<Plan, ValidationError> {
        let weights = &self.inner.config.stage_weights;
        let mut reused = TaskResult::default();
        let mut skip_transcribe = false;

        if job.paths.transcript.exists() {
            require_subtitles(StageKind::Filter, &job.paths.transcript).await?;
            reused.subtitle_path = Some(job.paths.transcript.clone());
            skip_transcribe = true;
        }

        let mut base = 0.0;
        let mut stages = Vec::with_capacity(StageKind::PIPELINE.len());
        for kind in StageKind::PIPELINE {
            let weight = kind.weight(weights);
            if !(skip_transcribe && kind == StageKind::Transcribe) {
                stages.push(PlannedStage { kind, base, weight });
            }
            base += weight;
        }

        Ok(Plan {
            task_id,
            operation,
            job,
            stages,
            reused,
        })
    }

    fn launch(&self, plan: Plan) -> Result<TaskId, ValidationError> {
        let task_id = plan.task_id.clone();
        let cancel = CancellationToken::new();
        {
            let mut live = self.live();
            if let Some((owner, artifact)) = live
                .iter()
                .find_map(|(id, task)| task.claims(&plan.job.paths).map(|p| (id, p)))
            {
                return Err(ValidationError::Busy {
                    task_id: owner.to_string(),
                    artifact: artifact.to_path_buf(),
                });
            }
            self.inner
                .registry
                .create(task_id.clone(), plan.operation.as_str())?;
            live.insert(
                task_id.clone(),
                LiveTask {
                    cancel: cancel.clone(),
                    paths: plan.job.paths.clone(),
                },
            );
        }

        tracing::info!(
            task_id = %task_id,
            operation = %plan.operation,
            video = %plan.job.video.display(),
            stages = plan.stages.len(),
            "task submitted"
        );

        let this = self.clone();
        let plan = Arc::new(plan);
        tokio::spawn(async move {
            let worker = tokio::spawn({
                let this = this.clone();
                let plan = plan.clone();
                let cancel = cancel.clone();
                async move { this.run_stages(&plan, &cancel).await }
            });
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => Err((this.current_stage(&plan), StageError::Aborted(join_failure(e)))),
            };
            this.finish(&plan, outcome);
            this.live().remove(&plan.task_id);
        });

        Ok(task_id)
    }

    /// Stage the registry last saw the task in.
    fn current_stage(&self, plan: &Plan) -> StageKind {
        self.inner
            .registry
            .try_get(plan.task_id.as_str())
            .and_then(|rec| rec.current_step.parse().ok())
            .or_else(|| plan.stages.first().map(|s| s.kind))
            .unwrap_or(StageKind::Transcribe)
    }

    async fn run_stages(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, (StageKind, StageError)> {
        let registry = &self.inner.registry;
        let mut result = plan.reused.clone();

        for planned in &plan.stages {
            let kind = planned.kind;
            if cancel.is_cancelled() {
                return Err((kind, StageError::Cancelled));
            }

            let ctx = StageContext::new(
                plan.task_id.clone(),
                kind,
                registry.clone(),
                cancel.clone(),
                planned.base,
                planned.weight,
                self.inner.config.batch_size,
            );
            registry
                .update(
                    plan.task_id.as_str(),
                    ProgressUpdate::processing(kind.label(), format!("starting {}", kind))
                        .with_percent(ctx.percent_at(0.0)),
                )
                .map_err(|e| (kind, e.into()))?;

            let output = self
                .inner
                .stages
                .get(kind)
                .execute(&plan.job, &ctx)
                .await
                .map_err(|e| (kind, e))?;

            match kind {
                StageKind::Transcribe => result.subtitle_path = Some(output.artifact),
                StageKind::Filter => result.filtered_path = Some(output.artifact),
                StageKind::Translate => result.translation_path = Some(output.artifact),
            }
            if !output.vocabulary.is_empty() || kind == StageKind::Translate {
                result.vocabulary = output.vocabulary;
            }
        }

        // a cancel that lands after the last stage still wins
        if cancel.is_cancelled() {
            let kind = plan.stages.last().map_or(StageKind::Translate, |s| s.kind);
            return Err((kind, StageError::Cancelled));
        }

        Ok(result)
    }

    fn finish(&self, plan: &Plan, outcome: Result<TaskResult, (StageKind, StageError)>) {
        let registry = &self.inner.registry;
        let task_id = plan.task_id.as_str();

        // the stall sweep may already have failed this task
        if registry.try_get(task_id).is_some_and(|r| r.is_terminal()) {
            tracing::debug!(task_id, "task already finalized");
            return;
        }

        let update = match outcome {
            Ok(result) => {
                tracing::info!(task_id, vocabulary = result.vocabulary.len(), "task completed");
                ProgressUpdate::completed(result)
            }
            Err((kind, StageError::Cancelled)) => {
                tracing::info!(task_id, stage = %kind, "task cancelled");
                ProgressUpdate::cancelled(format!("cancelled during {}", kind))
            }
            Err((kind, StageError::Registry(e))) => {
                tracing::error!(task_id, stage = %kind, error = %e, "registry rejected progress update");
                return;
            }
            Err((kind, e)) => {
                tracing::warn!(task_id, stage = %kind, error = %e, "task failed");
                ProgressUpdate::failed(kind.label(), format!("{}: {}", kind, e))
            }
        };

        if let Err(e) = registry.update(task_id, update) {
            tracing::error!(task_id, error = %e, "cannot finalize task");
        }
    }
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("panicked: {}", message)
}

fn require_file(path: &Path) -> Result<(), ValidationError> {
    if !path.is_file() {
        return Err(ValidationError::MissingFile(path.to_path_buf()));
    }
    Ok(())
}

/// Upstream subtitles for `stage` must exist and parse.
async fn require_subtitles(stage: StageKind, path: &Path) -> Result<(), ValidationError> {
    if !path.is_file() {
        return Err(ValidationError::MissingArtifact {
            stage: stage.label(),
            artifact: path.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(path).await?;
    srt::parse(&raw).map_err(|source| ValidationError::MalformedSubtitle {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        chunk::plan,
        registry::TaskStatus,
        stages::StageOutput,
        testing::{MockSpeech, MockTranslator},
    };

    const RAW: &str = "1\n00:00:00,000 --> 00:00:05,000\nHallo!\n\n2\n00:00:05,500 --> 00:00:10,000\nWie geht es dir?\n";

    fn orchestrator(speech: &str) -> Orchestrator {
        let capabilities = Capabilities::new(
            Arc::new(MockSpeech::new(speech)),
            Arc::new(MockTranslator::default()),
        );
        Orchestrator::new(TaskRegistry::new(), capabilities, PipelineConfig::default())
    }

    async fn wait_terminal(orch: &Orchestrator, task_id: &TaskId) -> ProgressRecord {
        for _ in 0..500 {
            let rec = orch.poll_progress(task_id.as_str());
            if rec.is_terminal() {
                return rec;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never finished", task_id);
    }

    #[tokio::test]
    async fn test_full_pipeline_completes_with_result() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(&video, b"video").unwrap();
        let orch = orchestrator(RAW);

        let task_id = orch
            .submit_full_pipeline(JobRequest::new(&video, Languages::default(), KnownWordSet::new()))
            .await
            .unwrap();
        let rec = wait_terminal(&orch, &task_id).await;

        assert_eq!(rec.status, TaskStatus::Completed);
        assert_eq!(rec.percent, 100.0);
        let result = rec.result.unwrap();
        assert_eq!(result.subtitle_path, Some(dir.path().join("folge.srt")));
        assert_eq!(result.filtered_path, Some(dir.path().join("folge.filtered.srt")));
        assert_eq!(
            result.translation_path,
            Some(dir.path().join("folge.translated.srt"))
        );
        assert_eq!(result.vocabulary, vec!["dir", "es", "geht", "hallo", "wie"]);
    }

    #[tokio::test]
    async fn test_missing_video_is_rejected_without_task() {
        let orch = orchestrator(RAW);
        let err = orch
            .submit_full_pipeline(JobRequest::new(
                "/does/not/exist.mp4",
                Languages::default(),
                KnownWordSet::new(),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::MissingFile(_)));
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_filter_stage_needs_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        let orch = orchestrator(RAW);

        let err = orch
            .submit_stage(
                StageKind::Filter,
                JobRequest::new(&video, Languages::default(), KnownWordSet::new()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "missing_artifact");
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_upstream_subtitles_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(dir.path().join("folge.filtered.srt"), "1\nkaputt\n").unwrap();
        let orch = orchestrator(RAW);

        let err = orch
            .submit_stage(
                StageKind::Translate,
                JobRequest::new(&video, Languages::default(), KnownWordSet::new()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::MalformedSubtitle { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_not_accepted() {
        let orch = orchestrator(RAW);
        assert!(!orch.cancel("pipeline_0_none_1"));
    }

    #[tokio::test]
    async fn test_cancel_before_worker_runs() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(&video, b"video").unwrap();
        let orch = orchestrator(RAW);

        // current-thread runtime: the worker cannot start before we cancel
        let task_id = orch
            .submit_full_pipeline(JobRequest::new(&video, Languages::default(), KnownWordSet::new()))
            .await
            .unwrap();
        assert!(orch.cancel(task_id.as_str()));

        let rec = wait_terminal(&orch, &task_id).await;
        assert_eq!(rec.status, TaskStatus::Cancelled);
        assert!(rec.result.is_none());
        assert!(rec.percent < 100.0);
        assert!(!dir.path().join("folge.srt").exists());
        // token released once finished
        assert!(!orch.cancel(task_id.as_str()));
    }

    struct ExplodingStage;

    #[async_trait]
    impl StageExecutor for ExplodingStage {
        fn stage(&self) -> StageKind {
            StageKind::Transcribe
        }

        async fn execute(&self, _job: &StageJob, _ctx: &StageContext) -> Result<StageOutput, StageError> {
            panic!("recognizer exploded");
        }
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_task_and_releases_it() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(&video, b"video").unwrap();
        let orch = orchestrator(RAW).with_stage(Arc::new(ExplodingStage));

        let task_id = orch
            .submit_full_pipeline(JobRequest::new(&video, Languages::default(), KnownWordSet::new()))
            .await
            .unwrap();
        let rec = wait_terminal(&orch, &task_id).await;

        assert_eq!(rec.status, TaskStatus::Failed);
        assert_eq!(rec.current_step, "transcribe");
        let error = rec.error.unwrap();
        assert!(error.contains("panicked: recognizer exploded"), "{}", error);
        assert!(orch.live_tasks().is_empty());
        assert!(!orch.cancel(task_id.as_str()));
    }

    /// Writes the transcript once the gate opens.
    struct ParkedStage {
        gate: CancellationToken,
    }

    #[async_trait]
    impl StageExecutor for ParkedStage {
        fn stage(&self) -> StageKind {
            StageKind::Transcribe
        }

        async fn execute(&self, job: &StageJob, _ctx: &StageContext) -> Result<StageOutput, StageError> {
            self.gate.cancelled().await;
            std::fs::write(&job.paths.transcript, RAW).unwrap();
            Ok(StageOutput {
                artifact: job.paths.transcript.clone(),
                vocabulary: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_live_artifacts_cannot_be_claimed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(&video, b"video").unwrap();
        let gate = CancellationToken::new();
        let orch = orchestrator(RAW).with_stage(Arc::new(ParkedStage { gate: gate.clone() }));
        let request = || JobRequest::new(&video, Languages::default(), KnownWordSet::new());

        let first = orch.submit_full_pipeline(request()).await.unwrap();

        let err = orch.submit_full_pipeline(request()).await.unwrap_err();
        assert_eq!(err.kind(), "busy");
        match err {
            ValidationError::Busy { task_id, .. } => assert_eq!(task_id, first.as_str()),
            other => panic!("unexpected error {:?}", other),
        }
        let err = orch
            .submit_stage(StageKind::Transcribe, request())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Busy { ref artifact, .. } if artifact == &dir.path().join("folge.srt")));
        assert_eq!(orch.registry().len(), 1);

        // a chunk writes its own files
        let chunk = orch
            .submit_chunk(
                plan(&video, 0.0, 60.0).unwrap(),
                Languages::default(),
                KnownWordSet::new(),
            )
            .await
            .unwrap();
        assert_eq!(orch.live_tasks().len(), 2);

        gate.cancel();
        assert_eq!(wait_terminal(&orch, &first).await.status, TaskStatus::Completed);
        assert_eq!(wait_terminal(&orch, &chunk).await.status, TaskStatus::Completed);

        let again = orch.submit_full_pipeline(request()).await.unwrap();
        assert_ne!(again, first);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::from(StageKind::Filter).as_str(), "filter");
        assert_eq!(Operation::Chunk.to_string(), "chunk");
    }
}
