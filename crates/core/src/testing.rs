use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    capabilities::{SpeechToText, TranscribeRequest, Translator},
    registry::{TaskId, TaskRegistry},
    stages::{StageContext, StageKind},
};

pub struct MockSpeech {
    pub srt: String,
    pub requests: Mutex<Vec<TranscribeRequest>>,
}

impl MockSpeech {
    pub fn new(srt: &str) -> Self {
        Self {
            srt: srt.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechToText for MockSpeech {
    fn name(&self) -> &str {
        "mock-speech"
    }

    async fn transcribe(&self, request: &TranscribeRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.srt.clone())
    }
}

/// Prefixes text with the target language, counts calls.
#[derive(Default)]
pub struct MockTranslator {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl MockTranslator {
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
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        "mock-translator"
    }

    async fn translate(&self, text: &str, _source: &str, target: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("translation service unavailable");
        }
        Ok(format!("[{}] {}", target, text))
    }
}

pub fn context(stage: StageKind) -> (StageContext, TaskRegistry, CancellationToken) {
    let registry = TaskRegistry::new();
    registry.create(TaskId::new("test"), "test").unwrap();
    let cancel = CancellationToken::new();
    let ctx = StageContext::new(
        TaskId::new("test"),
        stage,
        registry.clone(),
        cancel.clone(),
        0.0,
        1.0,
        2,
    );
    (ctx, registry, cancel)
}
