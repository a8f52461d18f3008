//! User intents and their results.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::data::Dataset;
use crate::evaluation::EvaluationReport;
use crate::export::ExportReceipt;
use crate::model::{CompileConfig, ModelSpec};
use crate::training::{TrainingConfig, TrainingHandle};

/// Everything the presentation layer can ask a session to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    LoadDataset { dataset: Dataset },
    SetPartition { features: Vec<String>, targets: Vec<String> },
    DefineModel { spec: ModelSpec },
    CompileModel { config: CompileConfig },
    StartTraining { config: TrainingConfig },
    CancelTraining,
    AcceptTrainedModel,
    DiscardTrainingRun,
    Evaluate,
    EvaluateHoldout { dataset: Dataset },
    Export { path: PathBuf, format: String },
    Predict { dataset: Dataset },
}

impl Intent {
    /// Name of the session operation the intent maps to.
    pub fn operation(&self) -> &'static str {
        match self {
            Intent::LoadDataset { .. } => "load_dataset",
            Intent::SetPartition { .. } => "set_partition",
            Intent::DefineModel { .. } => "define_model",
            Intent::CompileModel { .. } => "compile_model",
            Intent::StartTraining { .. } => "start_training",
            Intent::CancelTraining => "cancel_training",
            Intent::AcceptTrainedModel => "accept_trained_model",
            Intent::DiscardTrainingRun => "discard_training_run",
            Intent::Evaluate => "evaluate",
            Intent::EvaluateHoldout { .. } => "evaluate_holdout",
            Intent::Export { .. } => "export",
            Intent::Predict { .. } => "predict",
        }
    }
}

/// Result of a dispatched intent.
pub enum Outcome<B: Backend> {
    Applied,
    TrainingStarted(TrainingHandle<B>),
    /// Whether a cancellation request reached a running run.
    CancelRequested(bool),
    Evaluated(EvaluationReport),
    Exported(ExportReceipt),
    Predicted(Dataset),
}

impl<B: Backend> fmt::Debug for Outcome<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => f.write_str("Applied"),
            Outcome::TrainingStarted(handle) => {
                f.debug_tuple("TrainingStarted").field(handle).finish()
            }
            Outcome::CancelRequested(flag) => f.debug_tuple("CancelRequested").field(flag).finish(),
            Outcome::Evaluated(report) => f.debug_tuple("Evaluated").field(report).finish(),
            Outcome::Exported(receipt) => f.debug_tuple("Exported").field(receipt).finish(),
            Outcome::Predicted(dataset) => f.debug_tuple("Predicted").field(dataset).finish(),
        }
    }
}
