#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sublingo_core::{
    Capabilities, Orchestrator, PipelineConfig, ProgressRecord, SpeechToText, StageError,
    StageExecutor, StageKind, TaskId, TaskRegistry, TranscribeRequest, Translator,
    stages::{StageContext, StageJob, StageOutput},
};
use tokio::sync::Notify;

pub const TRANSCRIPT: &str = "\
1
00:00:00,000 --> 00:00:05,000
Hallo!

2
00:00:05,500 --> 00:00:10,000
Wie geht es dir?

3
00:01:02,000 --> 00:01:06,000
Ich gehe heute ins Kino.

4
00:01:59,000 --> 00:02:03,000
Kommst du mit?

5
00:02:10,000 --> 00:02:12,000
Tschüss!
";

/// Returns a fixed transcript and records every request.
pub struct FakeSpeech {
    srt: String,
    pub requests: Mutex<Vec<TranscribeRequest>>,
}

impl FakeSpeech {
    pub fn new(srt: &str) -> Self {
        Self {
            srt: srt.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    fn name(&self) -> &str {
        "fake-speech"
    }

    async fn transcribe(&self, request: &TranscribeRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.srt.clone())
    }
}

/// Speech provider that blocks until released, so tests can act mid-stage.
pub struct GatedSpeech {
    srt: String,
    pub started: Notify,
    pub release: Notify,
}

impl GatedSpeech {
    pub fn new(srt: &str) -> Self {
        Self {
            srt: srt.to_string(),
            started: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SpeechToText for GatedSpeech {
    fn name(&self) -> &str {
        "gated-speech"
    }

    async fn transcribe(&self, _request: &TranscribeRequest) -> anyhow::Result<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.srt.clone())
    }
}

#[derive(Default)]
pub struct FakeTranslator {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeTranslator {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    fn name(&self) -> &str {
        "fake-translator"
    }

    async fn translate(&self, text: &str, _source: &str, target: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("quota exceeded");
        }
        Ok(format!("({}) {}", target, text))
    }
}

pub fn orchestrator(
    speech: Arc<dyn SpeechToText>,
    translator: Arc<dyn Translator>,
) -> Orchestrator {
    let config = PipelineConfig {
        batch_size: 2,
        ..PipelineConfig::default()
    };
    Orchestrator::new(TaskRegistry::new(), Capabilities::new(speech, translator), config)
}

/// Create an empty stand-in video file.
pub fn video(dir: &Path) -> PathBuf {
    let path = dir.join("folge.mp4");
    std::fs::write(&path, b"not really a video").unwrap();
    path
}

/// Poll until the task reaches a terminal status, returning every observed record.
pub async fn poll_until_done(orch: &Orchestrator, task_id: &TaskId) -> Vec<ProgressRecord> {
    let mut seen = Vec::new();
    for _ in 0..5000 {
        let rec = orch.poll_progress(task_id.as_str());
        let done = rec.is_terminal();
        seen.push(rec);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("task {} did not finish", task_id);
}

/// Wraps a real stage and parks it until released.
pub struct GatedStage {
    inner: Arc<dyn StageExecutor>,
    pub started: Notify,
    pub release: Notify,
}

impl GatedStage {
    pub fn new(inner: Arc<dyn StageExecutor>) -> Self {
        Self {
            inner,
            started: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl StageExecutor for GatedStage {
    fn stage(&self) -> StageKind {
        self.inner.stage()
    }

    async fn execute(&self, job: &StageJob, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.execute(job, ctx).await
    }
}
