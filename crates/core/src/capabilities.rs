//! External capability providers the stages call into.
//!
//! Implementations live outside the core (Whisper, chat-completion APIs);
//! the core only sees these traits.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::{
    types::TimeRange,
    vocabulary::{LowercaseOracle, VocabularyOracle},
};

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub video: PathBuf,
    /// Restrict recognition to this window. Returned timestamps stay absolute.
    pub range: Option<TimeRange>,
    pub language: String,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    /// Returns raw SRT text
    async fn transcribe(&self, request: &TranscribeRequest) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct Capabilities {
    pub speech: Arc<dyn SpeechToText>,
    pub translator: Arc<dyn Translator>,
    pub oracle: Arc<dyn VocabularyOracle>,
}

impl Capabilities {
    pub fn new(speech: Arc<dyn SpeechToText>, translator: Arc<dyn Translator>) -> Self {
        Self {
            speech,
            translator,
            oracle: Arc::new(LowercaseOracle),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn VocabularyOracle>) -> Self {
        self.oracle = oracle;
        self
    }
}
