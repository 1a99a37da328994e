//! Background task orchestration for the sublingo subtitle pipeline.
//!
//! A video goes through three stages: transcribe, filter by the user's
//! known words, then selectively translate. The [`Orchestrator`] runs those
//! stages on background tasks and records progress in a [`TaskRegistry`]
//! that callers poll.

pub mod api;
pub mod artifacts;
pub mod capabilities;
pub mod chunk;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod srt;
pub mod stages;
pub mod types;
pub mod vocabulary;

#[cfg(test)]
mod testing;

pub use api::{ApiRequest, ApiResponse, dispatch, dispatch_line};
pub use artifacts::{ArtifactPaths, filtered_path, transcript_path, translated_path};
pub use capabilities::{Capabilities, SpeechToText, TranscribeRequest, Translator};
pub use chunk::{ChunkSpec, partition, plan, segments_in_range};
pub use config::{PipelineConfig, StageWeights};
pub use error::{ConfigError, RegistryError, Result, SrtError, StageError, ValidationError};
pub use orchestrator::{JobRequest, Operation, Orchestrator, SweepReport};
pub use registry::{ProgressRecord, ProgressUpdate, TaskId, TaskRegistry, TaskStatus};
pub use stages::{StageExecutor, StageKind};
pub use types::{Languages, SubtitleSegment, TaskResult, TimeRange};
pub use vocabulary::{KnownWordSet, LowercaseOracle, VocabularyOracle};
