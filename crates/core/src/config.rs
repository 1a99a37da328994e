use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pipeline tuning knobs, read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub stage_weights: StageWeights,
    /// Segments processed between progress writes and cancellation checks
    pub batch_size: usize,
    pub retention_secs: u64,
    pub stall_window_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Share of the overall percent each stage accounts for in a full run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageWeights {
    pub transcribe: f64,
    pub filter: f64,
    pub translate: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            transcribe: 0.5,
            filter: 0.2,
            translate: 0.3,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_weights: StageWeights::default(),
            batch_size: 25,
            retention_secs: 3600,
            stall_window_secs: 900,
            sweep_interval_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`PipelineConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// - SUBLINGO_BATCH_SIZE → batch_size
    /// - SUBLINGO_STALL_WINDOW_SECS → stall_window_secs
    /// - SUBLINGO_RETENTION_SECS → retention_secs
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_number("SUBLINGO_BATCH_SIZE")? {
            self.batch_size = v as usize;
        }
        if let Some(v) = env_number("SUBLINGO_STALL_WINDOW_SECS")? {
            self.stall_window_secs = v;
        }
        if let Some(v) = env_number("SUBLINGO_RETENTION_SECS")? {
            self.retention_secs = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.stage_weights;
        for (name, weight) in [
            ("transcribe", w.transcribe),
            ("filter", w.filter),
            ("translate", w.translate),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "stage_weights.{} must be positive, got {}",
                    name, weight
                )));
            }
        }
        let sum = w.transcribe + w.filter + w.translate;
        if (sum - 1.0).abs() > 0.001 {
            return Err(ConfigError::Invalid(format!(
                "stage_weights must sum to 1.0, got {}",
                sum
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()));
        }
        if self.retention_secs == 0 || self.stall_window_secs == 0 || self.sweep_interval_secs == 0
        {
            return Err(ConfigError::Invalid(
                "retention, stall window and sweep interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// ~/.config/sublingo/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sublingo")
            .join("config.toml")
    }
}

fn env_number(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got {:?}", key, v))),
        _ => Ok(None),
    }
}
