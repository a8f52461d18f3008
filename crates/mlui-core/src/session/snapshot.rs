//! Read-only views of a session for rendering.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::MetricMap;
use crate::session::Stage;
use crate::training::{RunStatus, TrainingRun};

/// Which slots currently hold an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFlags {
    pub dataset: bool,
    pub partition: bool,
    pub model_spec: bool,
    pub compiled_model: bool,
    pub training_run: bool,
    pub trained_model: bool,
    pub evaluation: bool,
    pub export: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub epochs_completed: usize,
    pub total_epochs: usize,
    pub latest_metrics: Option<MetricMap>,
    pub diagnostic: Option<String>,
    pub stopped_early: bool,
}

impl From<&TrainingRun> for TrainingProgress {
    fn from(run: &TrainingRun) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            epochs_completed: run.epochs_completed(),
            total_epochs: run.total_epochs,
            latest_metrics: run.latest_metrics().cloned(),
            diagnostic: run.diagnostic.clone(),
            stopped_early: run.stopped_early,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    /// Effective stage; `training` while a run is held.
    pub stage: Stage,
    pub committed_stage: Stage,
    pub artifacts: ArtifactFlags,
    pub training: Option<TrainingProgress>,
    pub evaluation: Option<MetricMap>,
}
