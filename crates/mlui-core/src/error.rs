//! Error taxonomy for session operations.
//!
//! Everything except [`SessionError::Internal`] is recoverable: the caller can
//! adjust its input or wait for training to finish and retry. Validation
//! errors are raised before any state is touched.

use std::fmt;

use uuid::Uuid;

use crate::export::ExportError;
use crate::session::{Stage, StageRequirement};
use crate::training::RunStatus;

/// Which side of a model disagrees with the dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeSide {
    Input,
    Output,
}

impl fmt::Display for ShapeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeSide::Input => f.write_str("input"),
            ShapeSide::Output => f.write_str("output"),
        }
    }
}

/// Errors produced by the session state machine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{operation} requires {requirement} (current stage: {current})")]
    Stage {
        operation: &'static str,
        requirement: StageRequirement,
        current: Stage,
    },

    #[error("invalid dataset: {0}")]
    InvalidData(String),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("invalid model spec: {0}")]
    InvalidModelSpec(String),

    #[error("{side} shape mismatch: model declares {declared}, partition has {expected} column(s)")]
    ShapeMismatch {
        side: ShapeSide,
        declared: usize,
        expected: usize,
    },

    #[error("invalid training config: {0}")]
    InvalidTrainingConfig(String),

    #[error("compilation rejected: {0}")]
    Compilation(String),

    #[error("training run {run_id} is still running")]
    ConcurrentTraining { run_id: Uuid },

    #[error("training run {run_id} finished as {status} and produced no model")]
    RunNotCompleted { run_id: Uuid, status: RunStatus },

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether the caller can adjust and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::Internal(_))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
