//! Optimizer, loss and metric configuration passed to `compile`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f64,
        #[serde(default)]
        momentum: f64,
    },
    #[serde(rename = "rmsprop")]
    RmsProp {
        learning_rate: f64,
        rho: f64,
        epsilon: f64,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
}

impl OptimizerConfig {
    pub fn sgd(learning_rate: f64, momentum: f64) -> Self {
        OptimizerConfig::Sgd {
            learning_rate,
            momentum,
        }
    }

    pub fn rmsprop(learning_rate: f64) -> Self {
        OptimizerConfig::RmsProp {
            learning_rate,
            rho: 0.9,
            epsilon: 1e-7,
        }
    }

    pub fn adam(learning_rate: f64) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }

    /// Look up an optimizer by name with default hyperparameters.
    pub fn named(name: &str, learning_rate: f64) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::sgd(learning_rate, 0.0)),
            "rmsprop" => Ok(Self::rmsprop(learning_rate)),
            "adam" => Ok(Self::adam(learning_rate)),
            other => Err(SessionError::Compilation(format!(
                "unknown optimizer `{other}`"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Sgd { .. } => "sgd",
            OptimizerConfig::RmsProp { .. } => "rmsprop",
            OptimizerConfig::Adam { .. } => "adam",
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerConfig::Sgd { learning_rate, .. }
            | OptimizerConfig::RmsProp { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    fn validate(&self) -> Result<()> {
        let lr = self.learning_rate();
        if !(lr > 0.0 && lr.is_finite()) {
            return Err(SessionError::Compilation(format!(
                "learning rate must be positive, got {lr}"
            )));
        }
        let in_unit = |v: f64| (0.0..1.0).contains(&v);
        let ok = match self {
            OptimizerConfig::Sgd { momentum, .. } => in_unit(*momentum),
            OptimizerConfig::RmsProp { rho, epsilon, .. } => in_unit(*rho) && *epsilon > 0.0,
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
                ..
            } => in_unit(*beta1) && in_unit(*beta2) && *epsilon > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(SessionError::Compilation(format!(
                "invalid {} hyperparameters",
                self.name()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Mse,
    Mae,
    BinaryCrossentropy,
}

impl LossKind {
    pub fn name(self) -> &'static str {
        match self {
            LossKind::Mse => "mse",
            LossKind::Mae => "mae",
            LossKind::BinaryCrossentropy => "binary_crossentropy",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(LossKind::Mse),
            "mae" | "mean_absolute_error" => Ok(LossKind::Mae),
            "binary_crossentropy" | "bce" => Ok(LossKind::BinaryCrossentropy),
            other => Err(SessionError::Compilation(format!("unknown loss `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Mse,
    Mae,
    Rmse,
    Accuracy,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Mse => "mse",
            MetricKind::Mae => "mae",
            MetricKind::Rmse => "rmse",
            MetricKind::Accuracy => "accuracy",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" => Ok(MetricKind::Mse),
            "mae" => Ok(MetricKind::Mae),
            "rmse" => Ok(MetricKind::Rmse),
            "accuracy" | "acc" => Ok(MetricKind::Accuracy),
            other => Err(SessionError::Compilation(format!(
                "unknown metric `{other}`"
            ))),
        }
    }
}

/// Everything `compile` needs besides the model itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub optimizer: OptimizerConfig,
    pub loss: LossKind,
    #[serde(default)]
    pub metrics: Vec<MetricKind>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::adam(0.001),
            loss: LossKind::Mse,
            metrics: Vec::new(),
        }
    }
}

impl CompileConfig {
    pub fn new(optimizer: OptimizerConfig, loss: LossKind) -> Self {
        Self {
            optimizer,
            loss,
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        if !self.metrics.contains(&metric) {
            self.metrics.push(metric);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        let mut seen = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            if seen.contains(metric) {
                return Err(SessionError::Compilation(format!(
                    "metric `{metric}` listed twice"
                )));
            }
            seen.push(*metric);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_optimizers() {
        assert_eq!(OptimizerConfig::named("SGD", 0.1).unwrap().name(), "sgd");
        assert_eq!(
            OptimizerConfig::named("adam", 0.01).unwrap().learning_rate(),
            0.01
        );
        assert!(OptimizerConfig::named("lbfgs", 0.1).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_learning_rate() {
        let cfg = CompileConfig::new(OptimizerConfig::sgd(0.0, 0.0), LossKind::Mse);
        assert!(matches!(cfg.validate(), Err(SessionError::Compilation(_))));
        let cfg = CompileConfig::new(OptimizerConfig::sgd(0.1, 1.5), LossKind::Mse);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_metric_rejected() {
        let mut cfg = CompileConfig::default().with_metric(MetricKind::Mae);
        assert!(cfg.validate().is_ok());
        cfg.metrics.push(MetricKind::Mae);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("mse".parse::<LossKind>().unwrap(), LossKind::Mse);
        assert_eq!(
            "binary_crossentropy".parse::<LossKind>().unwrap(),
            LossKind::BinaryCrossentropy
        );
        assert_eq!("rmse".parse::<MetricKind>().unwrap(), MetricKind::Rmse);
        assert!("huber".parse::<LossKind>().is_err());
    }

    #[test]
    fn test_config_json() {
        let cfg: CompileConfig = serde_json::from_value(serde_json::json!({
            "optimizer": {"kind": "sgd", "learning_rate": 0.05},
            "loss": "mae",
            "metrics": ["rmse"]
        }))
        .unwrap();
        assert_eq!(cfg.optimizer, OptimizerConfig::sgd(0.05, 0.0));
        assert_eq!(cfg.loss, LossKind::Mae);
        assert_eq!(cfg.metrics, vec![MetricKind::Rmse]);
    }
}
