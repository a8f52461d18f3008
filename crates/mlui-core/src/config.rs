//! Session configuration loaded from defaults and the process environment.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_TRAINING_TIMEOUT_SECS: &str = "MLUI_TRAINING_TIMEOUT_SECS";
pub const ENV_PROGRESS_BUFFER: &str = "MLUI_PROGRESS_BUFFER";

pub const DEFAULT_PROGRESS_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got `{value}`")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings shared by every training run of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Wall-clock limit for runs whose own config sets none.
    pub training_timeout: Option<Duration>,
    /// Capacity of each run's progress channel.
    pub progress_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            training_timeout: None,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }
}

fn positive(key: &'static str, raw: String) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

impl SessionConfig {
    /// Defaults overridden by `MLUI_TRAINING_TIMEOUT_SECS` and
    /// `MLUI_PROGRESS_BUFFER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`SessionConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TRAINING_TIMEOUT_SECS) {
            let secs = positive(ENV_TRAINING_TIMEOUT_SECS, raw)?;
            config.training_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup(ENV_PROGRESS_BUFFER) {
            config.progress_buffer = positive(ENV_PROGRESS_BUFFER, raw)? as usize;
        }
        Ok(config)
    }

    pub fn with_training_timeout(mut self, timeout: Duration) -> Self {
        self.training_timeout = Some(timeout);
        self
    }

    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }
}
