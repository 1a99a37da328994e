use std::path::PathBuf;

use thiserror::Error;

use crate::registry::TaskStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SrtError {
    #[error("Malformed subtitle at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

impl SrtError {
    pub fn line(&self) -> usize {
        match self {
            SrtError::Malformed { line, .. } => *line,
        }
    }
}

/// Rejected submissions. Raised before any registry entry exists.
///
/// `Registry` only surfaces when the registry refuses a fresh entry, which
/// points at a bug rather than bad input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid range [{start}, {end}): start must be >= 0 and end must be greater than start")]
    InvalidRange { start: f64, end: f64 },

    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error("Stage {stage} needs {artifact}, which does not exist yet")]
    MissingArtifact {
        stage: &'static str,
        artifact: PathBuf,
    },

    #[error("Malformed subtitle file {path}: {source}")]
    MalformedSubtitle {
        path: PathBuf,
        #[source]
        source: SrtError,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Task {task_id} is still writing {artifact}")]
    Busy { task_id: String, artifact: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidRange { .. } => "invalid_range",
            ValidationError::MissingFile(_) => "missing_file",
            ValidationError::MissingArtifact { .. } => "missing_artifact",
            ValidationError::MalformedSubtitle { .. } => "malformed_subtitle",
            ValidationError::UnsupportedOperation(_) => "unsupported_operation",
            ValidationError::Busy { .. } => "busy",
            ValidationError::Io(_) => "io",
            ValidationError::Registry(_) => "registry",
        }
    }
}

/// Registry contract violations. Correct orchestrator code never triggers these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Task {0} already exists")]
    DuplicateTask(String),

    #[error("Task {0} does not exist")]
    UnknownTask(String),

    #[error("Task {task_id} is {from:?} and cannot move to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{capability} failed: {source}")]
    Capability {
        capability: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Subtitle error in {path}: {source}")]
    Subtitle {
        path: PathBuf,
        #[source]
        source: SrtError,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("worker aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
