//! Per-run training configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::training::EarlyStopping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of trailing rows held out for `val_*` metrics.
    pub validation_split: f64,
    pub shuffle: bool,
    pub seed: u64,
    pub early_stopping: Option<EarlyStopping>,
    /// Wall-clock limit for the whole run. Falls back to the session default.
    pub timeout: Option<Duration>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            validation_split: 0.0,
            shuffle: true,
            seed: 42,
            early_stopping: None,
            timeout: None,
        }
    }
}

impl TrainingConfig {
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validation_split(mut self, fraction: f64) -> Self {
        self.validation_split = fraction;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn early_stopping(mut self, early_stopping: EarlyStopping) -> Self {
        self.early_stopping = Some(early_stopping);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SessionError::InvalidTrainingConfig(
                "epochs must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SessionError::InvalidTrainingConfig(
                "batch size must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(SessionError::InvalidTrainingConfig(format!(
                "validation split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SessionError::InvalidTrainingConfig(
                "timeout must be positive".into(),
            ));
        }
        if let Some(es) = &self.early_stopping {
            es.validate()?;
            if es.monitor.starts_with("val_") && self.validation_split == 0.0 {
                return Err(SessionError::InvalidTrainingConfig(format!(
                    "early stopping monitors `{}` but validation split is 0",
                    es.monitor
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_epochs_and_batch() {
        assert!(matches!(
            TrainingConfig::default().epochs(0).validate(),
            Err(SessionError::InvalidTrainingConfig(_))
        ));
        assert!(TrainingConfig::default().batch_size(0).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_split() {
        assert!(TrainingConfig::default()
            .validation_split(1.0)
            .validate()
            .is_err());
        assert!(TrainingConfig::default()
            .validation_split(-0.1)
            .validate()
            .is_err());
        assert!(TrainingConfig::default()
            .validation_split(0.2)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_val_monitor_needs_validation_split() {
        let cfg = TrainingConfig::default().early_stopping(EarlyStopping::new("val_loss", 2));
        assert!(cfg.validate().is_err());
        assert!(cfg.validation_split(0.2).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: TrainingConfig = serde_json::from_str(r#"{"epochs": 3}"#).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.batch_size, 32);
        assert!(cfg.shuffle);
    }
}
