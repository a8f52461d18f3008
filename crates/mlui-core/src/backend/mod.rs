//! The numeric backend contract.
//!
//! The session treats a backend as an opaque library with build, compile,
//! fit, evaluate, predict, serialize and load primitives. Handles produced by
//! a backend are never inspected by the workflow core.

pub mod dense;

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::export::ExportFormat;
use crate::model::{CompileConfig, ModelSpec};
use crate::training::TrainingConfig;

pub use dense::DenseBackend;

/// Metric name to value, ordered by name.
pub type MetricMap = BTreeMap<String, f64>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("model build failed: {0}")]
    Build(String),

    #[error("model compile failed: {0}")]
    Compile(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("format `{0}` is not supported by this backend")]
    UnsupportedFormat(String),
}

/// Feature and target matrices with matching row counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    pub features: Array2<f64>,
    pub targets: Array2<f64>,
}

impl TrainingData {
    pub fn new(features: Array2<f64>, targets: Array2<f64>) -> Self {
        Self { features, targets }
    }

    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    /// Hold out the trailing `fraction` of rows for validation.
    ///
    /// Returns `None` for the validation part when the fraction rounds down
    /// to zero rows. At least one training row is always kept.
    pub fn split_validation(&self, fraction: f64) -> (TrainingData, Option<TrainingData>) {
        let rows = self.n_rows();
        let val_rows = ((rows as f64) * fraction).floor() as usize;
        let val_rows = val_rows.min(rows.saturating_sub(1));
        if val_rows == 0 {
            return (self.clone(), None);
        }
        let cut = rows - val_rows;
        let train = TrainingData {
            features: self.features.slice(s![..cut, ..]).to_owned(),
            targets: self.targets.slice(s![..cut, ..]).to_owned(),
        };
        let val = TrainingData {
            features: self.features.slice(s![cut.., ..]).to_owned(),
            targets: self.targets.slice(s![cut.., ..]).to_owned(),
        };
        (train, Some(val))
    }
}

/// Metrics reported by the backend after one epoch. Epochs count from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub metrics: MetricMap,
}

/// Result of a `fit` call.
#[derive(Debug)]
pub struct FitOutcome<T> {
    pub model: T,
    pub epochs_completed: usize,
    /// The epoch callback returned `Break`.
    pub interrupted: bool,
}

/// Primitives the workflow core needs from a training library.
///
/// `fit` runs on a blocking worker thread and must call `on_epoch_end` once
/// per finished epoch; returning [`ControlFlow::Break`] from the callback asks
/// the backend to stop and return what it has.
pub trait Backend: Send + Sync + 'static {
    type Model: Send + 'static;
    type Compiled: Send + Sync + 'static;
    type Trained: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn build(&self, spec: &ModelSpec) -> Result<Self::Model, BackendError>;

    fn compile(
        &self,
        model: Self::Model,
        config: &CompileConfig,
    ) -> Result<Self::Compiled, BackendError>;

    fn fit(
        &self,
        compiled: &Self::Compiled,
        data: &TrainingData,
        config: &TrainingConfig,
        on_epoch_end: &mut dyn FnMut(EpochReport) -> ControlFlow<()>,
    ) -> Result<FitOutcome<Self::Trained>, BackendError>;

    /// Loss and compiled metrics on `data`; the map always contains `loss`.
    fn evaluate(&self, trained: &Self::Trained, data: &TrainingData)
        -> Result<MetricMap, BackendError>;

    fn predict(
        &self,
        trained: &Self::Trained,
        inputs: &Array2<f64>,
    ) -> Result<Array2<f64>, BackendError>;

    fn serialize(
        &self,
        trained: &Self::Trained,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError>;

    fn load(&self, bytes: &[u8], format: ExportFormat) -> Result<Self::Trained, BackendError>;
}
