//! Session state machine.
//!
//! A [`Session`] owns one artifact per slot and a committed [`Stage`]. Every
//! operation checks its stage requirement first, validates its input, stages
//! the change on a copy of the slots, verifies the slot invariants on that
//! copy and only then commits. A rejected operation leaves the session
//! exactly as it was.
//!
//! Training runs on the controller's worker; the session only holds the
//! run's handle until the caller accepts or discards it.

pub mod artifacts;
pub mod intent;
mod slots;
pub mod snapshot;
pub mod stage;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::SessionConfig;
use crate::data::{Dataset, Partition};
use crate::error::{Result, SessionError};
use crate::evaluation::{self, EvaluationReport};
use crate::export::{self, ExportFormat, ExportReceipt};
use crate::model::{CompileConfig, ModelSpec, ModelSummary};
use crate::obs;
use crate::training::{RunStatus, TrainingConfig, TrainingController, TrainingHandle};

pub use artifacts::{CompiledModel, TrainedModel, TrainingMetadata};
pub use intent::{Intent, Outcome};
pub use snapshot::{ArtifactFlags, SessionSnapshot, TrainingProgress};
pub use stage::{Stage, StageRequirement};

use slots::Slots;

/// Aggregate root of one ML workflow.
pub struct Session<B: Backend> {
    id: Uuid,
    backend: Arc<B>,
    config: SessionConfig,
    controller: TrainingController<B>,
    slots: Slots<B>,
    /// Runs removed by an invalidating mutation that may still be running.
    detached: Vec<TrainingHandle<B>>,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self::with_shared_backend(Arc::new(backend), config)
    }

    pub fn with_shared_backend(backend: Arc<B>, config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        obs::emit_session_created(id, backend.name());
        Self {
            id,
            controller: TrainingController::new(Arc::clone(&backend), &config),
            backend,
            config,
            slots: Slots::default(),
            detached: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Effective stage: [`Stage::Training`] while a run is held.
    pub fn stage(&self) -> Stage {
        self.slots.effective_stage()
    }

    /// Stage the session returns to once the held run is accepted or
    /// discarded.
    pub fn committed_stage(&self) -> Stage {
        self.slots.stage
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.slots.dataset.as_deref()
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.slots.partition.as_ref()
    }

    pub fn model_spec(&self) -> Option<&ModelSpec> {
        self.slots.spec.as_deref()
    }

    pub fn model_summary(&self) -> Option<ModelSummary> {
        self.slots.spec.as_ref().map(|spec| spec.summary())
    }

    pub fn compiled_model(&self) -> Option<&CompiledModel<B>> {
        self.slots.compiled.as_ref()
    }

    pub fn training_run(&self) -> Option<&TrainingHandle<B>> {
        self.slots.run.as_ref()
    }

    pub fn trained_model(&self) -> Option<&TrainedModel<B>> {
        self.slots.trained.as_ref()
    }

    pub fn evaluation(&self) -> Option<&EvaluationReport> {
        self.slots.evaluation.as_ref()
    }

    pub fn last_export(&self) -> Option<&ExportReceipt> {
        self.slots.last_export.as_ref()
    }

    /// Runs detached by an invalidating mutation that have not finished yet.
    pub fn detached_runs(&mut self) -> &[TrainingHandle<B>] {
        self.prune_detached();
        &self.detached
    }

    /// Replace the dataset. Every downstream artifact is cleared and an
    /// active run is asked to cancel.
    pub fn load_dataset(&mut self, dataset: Dataset) -> Result<()> {
        const OP: &str = "load_dataset";
        dataset.validate().map_err(|e| self.rejected(OP, e))?;

        let mut staged = self.slots.clone();
        let removed = staged.invalidate_downstream(Stage::Empty);
        staged.dataset = Some(Arc::new(dataset));
        staged.stage = Stage::DataLoaded;
        self.commit(OP, staged)?;
        self.retire(removed);
        Ok(())
    }

    pub fn set_partition(&mut self, features: Vec<String>, targets: Vec<String>) -> Result<()> {
        const OP: &str = "set_partition";
        let Some(dataset) = self.slots.dataset.clone() else {
            return Err(self.stage_error(OP, StageRequirement::AtLeast(Stage::DataLoaded)));
        };
        self.ensure_idle(OP)?;
        let partition = Partition::new(features, targets)
            .and_then(|p| p.validate_against(&dataset).map(|_| p))
            .map_err(|e| self.rejected(OP, e))?;

        let mut staged = self.slots.clone();
        let removed = staged.invalidate_downstream(Stage::DataLoaded);
        staged.partition = Some(partition);
        staged.stage = Stage::PartitionSet;
        self.commit(OP, staged)?;
        self.retire(removed);
        Ok(())
    }

    pub fn define_model(&mut self, spec: ModelSpec) -> Result<()> {
        const OP: &str = "define_model";
        if self.stage() < Stage::PartitionSet {
            return Err(self.stage_error(OP, StageRequirement::AtLeast(Stage::PartitionSet)));
        }
        self.ensure_idle(OP)?;
        let partition = self
            .slots
            .partition
            .as_ref()
            .ok_or_else(|| SessionError::Internal("partition missing past partition_set".into()))?;
        spec.validate()
            .and_then(|_| spec.check_partition(partition))
            .map_err(|e| self.rejected(OP, e))?;

        let mut staged = self.slots.clone();
        let removed = staged.invalidate_downstream(Stage::PartitionSet);
        staged.spec = Some(Arc::new(spec));
        staged.stage = Stage::ModelDefined;
        self.commit(OP, staged)?;
        self.retire(removed);
        Ok(())
    }

    /// Build and compile the defined model through the backend.
    pub fn compile_model(&mut self, config: CompileConfig) -> Result<()> {
        const OP: &str = "compile_model";
        if self.stage() != Stage::ModelDefined {
            return Err(self.stage_error(OP, StageRequirement::Exactly(Stage::ModelDefined)));
        }
        let spec = self
            .slots
            .spec
            .clone()
            .ok_or_else(|| SessionError::Internal("model spec missing at model_defined".into()))?;
        config.validate().map_err(|e| self.rejected(OP, e))?;
        let handle = self
            .backend
            .build(&spec)
            .and_then(|model| self.backend.compile(model, &config))
            .map_err(|e| self.rejected(OP, SessionError::Compilation(e.to_string())))?;

        let mut staged = self.slots.clone();
        staged.compiled = Some(CompiledModel {
            handle: Arc::new(handle),
            spec,
            config,
        });
        staged.stage = Stage::ModelCompiled;
        self.commit(OP, staged)
    }

    /// Start a run in the background and return its handle.
    ///
    /// A held run, running or finished, blocks a new one with
    /// `ConcurrentTraining` until it is accepted or discarded, as does a
    /// detached run that is still winding down. A previously accepted trained
    /// model stays in place until a new run is accepted.
    pub fn start_training(&mut self, config: TrainingConfig) -> Result<TrainingHandle<B>> {
        const OP: &str = "start_training";
        let Some(compiled) = self.slots.compiled.clone() else {
            return Err(self.stage_error(OP, StageRequirement::AtLeast(Stage::ModelCompiled)));
        };
        if let Some(run_id) = self.blocking_run_id() {
            return Err(self.rejected(OP, SessionError::ConcurrentTraining { run_id }));
        }
        config.validate().map_err(|e| self.rejected(OP, e))?;
        let (Some(dataset), Some(partition)) =
            (self.slots.dataset.clone(), self.slots.partition.clone())
        else {
            return Err(SessionError::Internal(
                "dataset or partition missing past model_compiled".into(),
            ));
        };

        let handle = self
            .controller
            .start(compiled.handle, dataset, partition, config)
            .map_err(|e| self.rejected(OP, e))?;

        let mut staged = self.slots.clone();
        staged.run = Some(handle.clone());
        if let Err(e) = self.commit(OP, staged) {
            handle.cancel();
            return Err(e);
        }
        Ok(handle)
    }

    /// Ask the held run to stop. Returns `false` if it had already finished.
    pub fn cancel_training(&mut self) -> Result<bool> {
        const OP: &str = "cancel_training";
        match &self.slots.run {
            Some(run) => Ok(run.cancel()),
            None => Err(self.stage_error(OP, StageRequirement::TrainingRun)),
        }
    }

    /// Turn the held, completed run into the session's trained model.
    pub fn accept_trained_model(&mut self) -> Result<()> {
        const OP: &str = "accept_trained_model";
        let run = self.finished_run(OP)?;
        let record = run.record();
        if record.status != RunStatus::Completed {
            return Err(self.rejected(
                OP,
                SessionError::RunNotCompleted {
                    run_id: record.run_id,
                    status: record.status,
                },
            ));
        }
        let (Some(handle), Some(compiled), Some(partition)) = (
            run.candidate(),
            self.slots.compiled.as_ref(),
            self.slots.partition.as_ref(),
        ) else {
            return Err(SessionError::Internal(
                "completed run has no model or upstream artifacts".into(),
            ));
        };

        let trained = TrainedModel {
            handle,
            spec: Arc::clone(&compiled.spec),
            compile_config: compiled.config.clone(),
            metadata: TrainingMetadata {
                run_id: record.run_id,
                epochs_completed: record.epochs_completed(),
                stopped_early: record.stopped_early,
                final_metrics: record.latest_metrics().cloned().unwrap_or_default(),
                features: partition.features().to_vec(),
                targets: partition.targets().to_vec(),
                trained_at: record.finished_at.unwrap_or_else(Utc::now),
            },
        };

        let mut staged = self.slots.clone();
        staged.run = None;
        staged.trained = Some(trained);
        staged.evaluation = None;
        staged.last_export = None;
        staged.stage = Stage::Trained;
        self.commit(OP, staged)
    }

    /// Drop the held, finished run and return to the committed stage.
    pub fn discard_training_run(&mut self) -> Result<()> {
        const OP: &str = "discard_training_run";
        self.finished_run(OP)?;
        let mut staged = self.slots.clone();
        staged.run = None;
        self.commit(OP, staged)
    }

    /// Evaluate the trained model on the loaded dataset.
    pub fn evaluate(&mut self) -> Result<EvaluationReport> {
        const OP: &str = "evaluate";
        self.require_trained(OP)?;
        let dataset = self
            .slots
            .dataset
            .clone()
            .ok_or_else(|| SessionError::Internal("dataset missing past trained".into()))?;
        self.evaluate_on(OP, &dataset)
    }

    /// Evaluate the trained model on a separate dataset with the same
    /// feature and target columns.
    pub fn evaluate_holdout(&mut self, holdout: &Dataset) -> Result<EvaluationReport> {
        const OP: &str = "evaluate_holdout";
        self.require_trained(OP)?;
        holdout.validate().map_err(|e| self.rejected(OP, e))?;
        self.evaluate_on(OP, holdout)
    }

    /// Write the trained model to `path` in the named format (`json` or `bin`).
    pub fn export(&mut self, path: &Path, format: &str) -> Result<ExportReceipt> {
        const OP: &str = "export";
        let trained = self.require_trained(OP)?;
        let format: ExportFormat = format
            .parse()
            .map_err(|e| self.rejected(OP, SessionError::Export(e)))?;
        let receipt = export::export(self.backend.as_ref(), trained.handle(), path, format)
            .map_err(|e| self.rejected(OP, SessionError::Export(e)))?;
        obs::emit_artifact_exported(
            &receipt.path,
            receipt.format.name(),
            receipt.bytes,
            &receipt.digest,
        );

        let mut staged = self.slots.clone();
        staged.last_export = Some(receipt.clone());
        staged.stage = Stage::Exported;
        self.commit(OP, staged)?;
        Ok(receipt)
    }

    /// Predict the target columns for every row of `inputs`. The session is
    /// not modified.
    pub fn predict(&self, inputs: &Dataset) -> Result<Dataset> {
        const OP: &str = "predict";
        let trained = self.require_trained(OP)?;
        let features = &trained.metadata.features;
        let matrix = inputs
            .matrix(features)
            .and_then(|m| {
                if m.nrows() == 0 {
                    Err(SessionError::InvalidData("no rows to predict".into()))
                } else if m.iter().any(|v| !v.is_finite()) {
                    Err(SessionError::InvalidData("non-finite feature value".into()))
                } else {
                    Ok(m)
                }
            })
            .map_err(|e| self.rejected(OP, e))?;
        let outputs = self
            .backend
            .predict(trained.handle(), &matrix)
            .map_err(|e| self.rejected(OP, SessionError::Evaluation(e.to_string())))?;
        Ok(Dataset::from_matrix(&trained.metadata.targets, &outputs))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = &self.slots;
        SessionSnapshot {
            session_id: self.id,
            stage: s.effective_stage(),
            committed_stage: s.stage,
            artifacts: ArtifactFlags {
                dataset: s.dataset.is_some(),
                partition: s.partition.is_some(),
                model_spec: s.spec.is_some(),
                compiled_model: s.compiled.is_some(),
                training_run: s.run.is_some(),
                trained_model: s.trained.is_some(),
                evaluation: s.evaluation.is_some(),
                export: s.last_export.is_some(),
            },
            training: s
                .run
                .as_ref()
                .map(|run| TrainingProgress::from(&run.record())),
            evaluation: s.evaluation.as_ref().map(|e| e.metrics.clone()),
        }
    }

    /// Single entry point for the presentation layer.
    pub fn dispatch(&mut self, intent: Intent) -> Result<Outcome<B>> {
        match intent {
            Intent::LoadDataset { dataset } => self.load_dataset(dataset).map(|_| Outcome::Applied),
            Intent::SetPartition { features, targets } => self
                .set_partition(features, targets)
                .map(|_| Outcome::Applied),
            Intent::DefineModel { spec } => self.define_model(spec).map(|_| Outcome::Applied),
            Intent::CompileModel { config } => {
                self.compile_model(config).map(|_| Outcome::Applied)
            }
            Intent::StartTraining { config } => {
                self.start_training(config).map(Outcome::TrainingStarted)
            }
            Intent::CancelTraining => self.cancel_training().map(Outcome::CancelRequested),
            Intent::AcceptTrainedModel => self.accept_trained_model().map(|_| Outcome::Applied),
            Intent::DiscardTrainingRun => self.discard_training_run().map(|_| Outcome::Applied),
            Intent::Evaluate => self.evaluate().map(Outcome::Evaluated),
            Intent::EvaluateHoldout { dataset } => {
                self.evaluate_holdout(&dataset).map(Outcome::Evaluated)
            }
            Intent::Export { path, format } => {
                self.export(&path, &format).map(Outcome::Exported)
            }
            Intent::Predict { dataset } => self.predict(&dataset).map(Outcome::Predicted),
        }
    }

    /// Verify the slot/stage implications of the current state.
    pub fn check_invariants(&self) -> Result<()> {
        self.slots.verify().map_err(SessionError::Internal)
    }

    fn evaluate_on(&mut self, op: &'static str, dataset: &Dataset) -> Result<EvaluationReport> {
        let trained = self.require_trained(op)?.clone();
        let partition = Partition::new(
            trained.metadata.features.clone(),
            trained.metadata.targets.clone(),
        )
        .map_err(|e| self.rejected(op, e))?;
        let data = partition
            .select(dataset)
            .map_err(|e| self.rejected(op, e))?;
        let report = evaluation::evaluate(self.backend.as_ref(), trained.handle(), &data)
            .map_err(|e| self.rejected(op, e))?;

        let mut staged = self.slots.clone();
        staged.evaluation = Some(report.clone());
        staged.stage = staged.stage.max(Stage::Evaluated);
        self.commit(op, staged)?;
        Ok(report)
    }

    fn require_trained(&self, op: &'static str) -> Result<&TrainedModel<B>> {
        if self.stage() < Stage::Trained {
            return Err(self.stage_error(op, StageRequirement::AtLeast(Stage::Trained)));
        }
        self.slots
            .trained
            .as_ref()
            .ok_or_else(|| SessionError::Internal("trained model missing past trained".into()))
    }

    fn finished_run(&self, op: &'static str) -> Result<TrainingHandle<B>> {
        match &self.slots.run {
            Some(run) if !run.is_running() => Ok(run.clone()),
            _ => Err(self.stage_error(op, StageRequirement::FinishedTrainingRun)),
        }
    }

    fn ensure_idle(&self, op: &'static str) -> Result<()> {
        match &self.slots.run {
            Some(run) if run.is_running() => {
                Err(self.stage_error(op, StageRequirement::NoRunningTraining))
            }
            _ => Ok(()),
        }
    }

    /// Id of the run that keeps a new one from starting: the held run in any
    /// status, otherwise a detached run that is still running.
    fn blocking_run_id(&mut self) -> Option<Uuid> {
        if let Some(run) = &self.slots.run {
            return Some(run.run_id());
        }
        self.prune_detached();
        self.detached
            .iter()
            .find(|run| run.is_running())
            .map(TrainingHandle::run_id)
    }

    fn stage_error(&self, operation: &'static str, requirement: StageRequirement) -> SessionError {
        self.rejected(
            operation,
            SessionError::Stage {
                operation,
                requirement,
                current: self.stage(),
            },
        )
    }

    fn rejected(&self, operation: &str, error: SessionError) -> SessionError {
        obs::emit_operation_rejected(self.id, operation, &error);
        error
    }

    fn commit(&mut self, operation: &str, staged: Slots<B>) -> Result<()> {
        if let Err(detail) = staged.verify() {
            obs::emit_invariant_violation(self.id, operation, &detail);
            return Err(SessionError::Internal(detail));
        }
        let from = self.stage();
        self.slots = staged;
        let to = self.stage();
        if from != to {
            obs::emit_stage_transition(self.id, operation, from, to);
        }
        Ok(())
    }

    /// Cancel a run removed from its slot and keep it until it finishes.
    fn retire(&mut self, removed: Option<TrainingHandle<B>>) {
        if let Some(run) = removed {
            if run.cancel() && !self.detached.iter().any(|d| d.same_run(&run)) {
                self.detached.push(run);
            }
        }
        self.prune_detached();
    }

    fn prune_detached(&mut self) {
        self.detached.retain(TrainingHandle::is_running);
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        if let Some(run) = &self.slots.run {
            run.cancel();
        }
        for run in &self.detached {
            run.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedBackend;
    use crate::model::Activation;

    fn session() -> Session<ScriptedBackend> {
        Session::new(ScriptedBackend::new(), SessionConfig::default())
    }

    fn dataset() -> Dataset {
        Dataset::from_rows(
            &["a", "b", "y"],
            &[vec![1.0, 2.0, 3.0], vec![2.0, 1.0, 3.0], vec![0.5, 0.5, 1.0]],
        )
    }

    fn spec() -> ModelSpec {
        ModelSpec::builder("m")
            .input(2)
            .dense(4, Activation::Relu)
            .dense(1, Activation::Linear)
            .build()
            .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_session_is_empty() {
        let s = session();
        assert_eq!(s.stage(), Stage::Empty);
        assert_eq!(s.snapshot().artifacts, ArtifactFlags::default());
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn test_operations_out_of_order_are_stage_errors() {
        let mut s = session();
        assert!(matches!(
            s.set_partition(names(&["a"]), names(&["y"])),
            Err(SessionError::Stage {
                operation: "set_partition",
                current: Stage::Empty,
                ..
            })
        ));
        assert!(matches!(
            s.compile_model(CompileConfig::default()),
            Err(SessionError::Stage { .. })
        ));
        assert!(matches!(
            s.start_training(TrainingConfig::default()),
            Err(SessionError::Stage { .. })
        ));
        assert!(matches!(s.cancel_training(), Err(SessionError::Stage { .. })));
        assert!(matches!(s.evaluate(), Err(SessionError::Stage { .. })));
        assert!(matches!(
            s.predict(&dataset()),
            Err(SessionError::Stage { .. })
        ));
        assert_eq!(s.stage(), Stage::Empty);
    }

    #[test]
    fn test_invalid_dataset_leaves_state() {
        let mut s = session();
        s.load_dataset(dataset()).unwrap();
        let err = s.load_dataset(Dataset::default()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidData(_)));
        assert_eq!(s.stage(), Stage::DataLoaded);
        assert!(s.dataset().is_some());
    }

    #[test]
    fn test_define_model_checks_shapes() {
        let mut s = session();
        s.load_dataset(dataset()).unwrap();
        s.set_partition(names(&["a"]), names(&["y"])).unwrap();
        let err = s.define_model(spec()).unwrap_err();
        assert!(matches!(err, SessionError::ShapeMismatch { .. }));
        assert_eq!(s.stage(), Stage::PartitionSet);
    }

    #[test]
    fn test_compile_requires_exactly_model_defined() {
        let mut s = session();
        s.load_dataset(dataset()).unwrap();
        s.set_partition(names(&["a", "b"]), names(&["y"])).unwrap();
        s.define_model(spec()).unwrap();
        s.compile_model(CompileConfig::default()).unwrap();
        assert_eq!(s.stage(), Stage::ModelCompiled);
        let err = s.compile_model(CompileConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Stage {
                requirement: StageRequirement::Exactly(Stage::ModelDefined),
                ..
            }
        ));
    }

    #[test]
    fn test_backend_compile_rejection() {
        let mut s = Session::new(
            ScriptedBackend::new().rejecting_compile("no gpu"),
            SessionConfig::default(),
        );
        s.load_dataset(dataset()).unwrap();
        s.set_partition(names(&["a", "b"]), names(&["y"])).unwrap();
        s.define_model(spec()).unwrap();
        let err = s.compile_model(CompileConfig::default()).unwrap_err();
        assert!(matches!(err, SessionError::Compilation(msg) if msg.contains("no gpu")));
        assert_eq!(s.stage(), Stage::ModelDefined);
    }

    #[test]
    fn test_redefining_model_clears_compiled() {
        let mut s = session();
        s.load_dataset(dataset()).unwrap();
        s.set_partition(names(&["a", "b"]), names(&["y"])).unwrap();
        s.define_model(spec()).unwrap();
        s.compile_model(CompileConfig::default()).unwrap();
        s.define_model(spec()).unwrap();
        assert_eq!(s.stage(), Stage::ModelDefined);
        assert!(s.compiled_model().is_none());
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn test_training_outside_runtime_is_internal() {
        let mut s = session();
        s.load_dataset(dataset()).unwrap();
        s.set_partition(names(&["a", "b"]), names(&["y"])).unwrap();
        s.define_model(spec()).unwrap();
        s.compile_model(CompileConfig::default()).unwrap();
        let err = s.start_training(TrainingConfig::default()).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(s.stage(), Stage::ModelCompiled);
        assert!(s.training_run().is_none());
    }
}
