//! Scripted backend for deterministic session and controller tests.
//!
//! `ScriptedBackend` reports `loss = 1 / epoch`, can sleep between epochs,
//! and can be told to fail, panic or report a non-finite loss at a given
//! epoch. It needs no numeric work, so tests can steer timing precisely.

use std::ops::ControlFlow;
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendError, EpochReport, FitOutcome, MetricMap, TrainingData};
use crate::export::ExportFormat;
use crate::model::{CompileConfig, ModelSpec};
use crate::training::TrainingConfig;

#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    epoch_delay: Duration,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
    non_finite_at: Option<usize>,
    reject_compile: Option<String>,
}

/// Trained artifact of the scripted backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedModel {
    pub epochs_trained: usize,
    pub outputs: usize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every epoch.
    pub fn with_epoch_delay(mut self, delay: Duration) -> Self {
        self.epoch_delay = delay;
        self
    }

    pub fn failing_at_epoch(mut self, epoch: usize) -> Self {
        self.fail_at = Some(epoch);
        self
    }

    pub fn panicking_at_epoch(mut self, epoch: usize) -> Self {
        self.panic_at = Some(epoch);
        self
    }

    pub fn non_finite_at_epoch(mut self, epoch: usize) -> Self {
        self.non_finite_at = Some(epoch);
        self
    }

    pub fn rejecting_compile(mut self, reason: impl Into<String>) -> Self {
        self.reject_compile = Some(reason.into());
        self
    }

    /// A model as if trained for `epochs` epochs on one target column.
    pub fn trained(&self, epochs: usize) -> ScriptedModel {
        ScriptedModel {
            epochs_trained: epochs,
            outputs: 1,
        }
    }
}

fn loss_after(epochs: usize) -> f64 {
    1.0 / epochs.max(1) as f64
}

impl Backend for ScriptedBackend {
    type Model = ();
    type Compiled = ();
    type Trained = ScriptedModel;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn build(&self, spec: &ModelSpec) -> Result<(), BackendError> {
        spec.validate()
            .map_err(|e| BackendError::Build(e.to_string()))
    }

    fn compile(&self, _model: (), config: &CompileConfig) -> Result<(), BackendError> {
        if let Some(reason) = &self.reject_compile {
            return Err(BackendError::Compile(reason.clone()));
        }
        config
            .validate()
            .map_err(|e| BackendError::Compile(e.to_string()))
    }

    fn fit(
        &self,
        _compiled: &(),
        data: &TrainingData,
        config: &TrainingConfig,
        on_epoch_end: &mut dyn FnMut(EpochReport) -> ControlFlow<()>,
    ) -> Result<FitOutcome<ScriptedModel>, BackendError> {
        let mut epochs_completed = 0;
        let mut interrupted = false;
        for epoch in 1..=config.epochs {
            if !self.epoch_delay.is_zero() {
                std::thread::sleep(self.epoch_delay);
            }
            if self.fail_at == Some(epoch) {
                return Err(BackendError::Training(format!(
                    "scripted failure at epoch {epoch}"
                )));
            }
            if self.panic_at == Some(epoch) {
                panic!("scripted panic at epoch {epoch}");
            }

            let loss = if self.non_finite_at == Some(epoch) {
                f64::NAN
            } else {
                loss_after(epoch)
            };
            let mut metrics = MetricMap::from([("loss".to_string(), loss)]);
            if config.validation_split > 0.0 {
                metrics.insert("val_loss".to_string(), loss + 0.1);
            }

            epochs_completed = epoch;
            if on_epoch_end(EpochReport { epoch, metrics }).is_break() {
                interrupted = true;
                break;
            }
        }
        Ok(FitOutcome {
            model: ScriptedModel {
                epochs_trained: epochs_completed,
                outputs: data.targets.ncols(),
            },
            epochs_completed,
            interrupted,
        })
    }

    fn evaluate(
        &self,
        trained: &ScriptedModel,
        data: &TrainingData,
    ) -> Result<MetricMap, BackendError> {
        if data.n_rows() == 0 {
            return Err(BackendError::Inference("no rows to evaluate".into()));
        }
        Ok(MetricMap::from([(
            "loss".to_string(),
            loss_after(trained.epochs_trained),
        )]))
    }

    fn predict(
        &self,
        trained: &ScriptedModel,
        inputs: &Array2<f64>,
    ) -> Result<Array2<f64>, BackendError> {
        Ok(Array2::from_elem(
            (inputs.nrows(), trained.outputs),
            trained.epochs_trained as f64,
        ))
    }

    fn serialize(
        &self,
        trained: &ScriptedModel,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError> {
        match format {
            ExportFormat::Json => serde_json::to_vec(trained)
                .map_err(|e| BackendError::Serialization(e.to_string())),
            other => Err(BackendError::UnsupportedFormat(other.to_string())),
        }
    }

    fn load(&self, bytes: &[u8], format: ExportFormat) -> Result<ScriptedModel, BackendError> {
        match format {
            ExportFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| BackendError::Serialization(e.to_string())),
            other => Err(BackendError::UnsupportedFormat(other.to_string())),
        }
    }
}
