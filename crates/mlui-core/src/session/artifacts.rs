//! Artifact handles stored in session slots.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Backend, MetricMap};
use crate::model::{CompileConfig, ModelSpec};

/// A spec compiled by the backend.
pub struct CompiledModel<B: Backend> {
    pub(crate) handle: Arc<B::Compiled>,
    pub(crate) spec: Arc<ModelSpec>,
    pub(crate) config: CompileConfig,
}

impl<B: Backend> Clone for CompiledModel<B> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            spec: Arc::clone(&self.spec),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for CompiledModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModel")
            .field("spec", &self.spec.name)
            .field("optimizer", &self.config.optimizer.name())
            .field("loss", &self.config.loss)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> CompiledModel<B> {
    pub fn handle(&self) -> &B::Compiled {
        &self.handle
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }
}

/// Provenance of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub run_id: Uuid,
    pub epochs_completed: usize,
    pub stopped_early: bool,
    /// Metrics of the last recorded epoch.
    pub final_metrics: MetricMap,
    pub features: Vec<String>,
    pub targets: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

/// Immutable result of an accepted training run.
pub struct TrainedModel<B: Backend> {
    pub(crate) handle: Arc<B::Trained>,
    pub(crate) spec: Arc<ModelSpec>,
    pub(crate) compile_config: CompileConfig,
    pub(crate) metadata: TrainingMetadata,
}

impl<B: Backend> Clone for TrainedModel<B> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            spec: Arc::clone(&self.spec),
            compile_config: self.compile_config.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for TrainedModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("spec", &self.spec.name)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TrainedModel<B> {
    pub fn handle(&self) -> &B::Trained {
        &self.handle
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn compile_config(&self) -> &CompileConfig {
        &self.compile_config
    }

    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }

    /// Whether two values refer to the same backend artifact.
    pub fn same_artifact(&self, other: &TrainedModel<B>) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}
