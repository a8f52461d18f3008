//! Early-stopping callback evaluated at epoch boundaries.

use serde::{Deserialize, Serialize};

use crate::backend::MetricMap;
use crate::error::{Result, SessionError};

/// Stop when `monitor` has not improved by more than `min_delta` for
/// `patience` consecutive epochs. Metrics ending in `accuracy` are maximised,
/// everything else is minimised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub monitor: String,
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, patience: usize) -> Self {
        Self {
            monitor: monitor.into(),
            patience,
            min_delta: 0.0,
        }
    }

    pub fn min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn maximize(&self) -> bool {
        self.monitor.ends_with("accuracy")
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.trim().is_empty() {
            return Err(SessionError::InvalidTrainingConfig(
                "early stopping monitor must not be empty".into(),
            ));
        }
        if self.patience == 0 {
            return Err(SessionError::InvalidTrainingConfig(
                "early stopping patience must be at least 1".into(),
            ));
        }
        if !(self.min_delta >= 0.0 && self.min_delta.is_finite()) {
            return Err(SessionError::InvalidTrainingConfig(format!(
                "early stopping min_delta must be non-negative, got {}",
                self.min_delta
            )));
        }
        Ok(())
    }

    pub fn tracker(&self) -> EarlyStoppingTracker {
        EarlyStoppingTracker {
            rule: self.clone(),
            best: None,
            wait: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EarlyStoppingTracker {
    rule: EarlyStopping,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStoppingTracker {
    /// Feed one epoch's metrics; returns `true` when training should stop.
    /// Epochs that do not report the monitored metric are ignored.
    pub fn observe(&mut self, metrics: &MetricMap) -> bool {
        let Some(&value) = metrics.get(&self.rule.monitor) else {
            return false;
        };
        let improved = match self.best {
            None => true,
            Some(best) if self.rule.maximize() => value > best + self.rule.min_delta,
            Some(best) => value < best - self.rule.min_delta,
        };
        if improved {
            self.best = Some(value);
            self.wait = 0;
            false
        } else {
            self.wait += 1;
            self.wait >= self.rule.patience
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
