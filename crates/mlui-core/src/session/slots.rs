//! The session's artifact slots and their stage invariants.

use std::sync::Arc;

use crate::backend::Backend;
use crate::data::{Dataset, Partition};
use crate::evaluation::EvaluationReport;
use crate::export::ExportReceipt;
use crate::model::ModelSpec;
use crate::session::{CompiledModel, Stage, TrainedModel};
use crate::training::TrainingHandle;

/// One artifact per slot, plus the committed stage.
///
/// `stage` never holds [`Stage::Training`]; a held run is reported through
/// [`Slots::effective_stage`].
pub(crate) struct Slots<B: Backend> {
    pub stage: Stage,
    pub dataset: Option<Arc<Dataset>>,
    pub partition: Option<Partition>,
    pub spec: Option<Arc<ModelSpec>>,
    pub compiled: Option<CompiledModel<B>>,
    pub run: Option<TrainingHandle<B>>,
    pub trained: Option<TrainedModel<B>>,
    pub evaluation: Option<EvaluationReport>,
    pub last_export: Option<ExportReceipt>,
}

impl<B: Backend> Clone for Slots<B> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            dataset: self.dataset.clone(),
            partition: self.partition.clone(),
            spec: self.spec.clone(),
            compiled: self.compiled.clone(),
            run: self.run.clone(),
            trained: self.trained.clone(),
            evaluation: self.evaluation.clone(),
            last_export: self.last_export.clone(),
        }
    }
}

impl<B: Backend> Default for Slots<B> {
    fn default() -> Self {
        Self {
            stage: Stage::Empty,
            dataset: None,
            partition: None,
            spec: None,
            compiled: None,
            run: None,
            trained: None,
            evaluation: None,
            last_export: None,
        }
    }
}

fn implication(name: &str, present: bool, required: bool, stage: Stage) -> Result<(), String> {
    if present == required {
        Ok(())
    } else if present {
        Err(format!("{name} is set at stage {stage}"))
    } else {
        Err(format!("{name} is missing at stage {stage}"))
    }
}

impl<B: Backend> Slots<B> {
    pub fn effective_stage(&self) -> Stage {
        if self.run.is_some() {
            Stage::Training
        } else {
            self.stage
        }
    }

    /// Clear every slot that belongs to a stage after `keep` and set the
    /// committed stage to `keep`. A removed run is returned so the caller can
    /// cancel it once the change is committed.
    pub fn invalidate_downstream(&mut self, keep: Stage) -> Option<TrainingHandle<B>> {
        if keep < Stage::DataLoaded {
            self.dataset = None;
        }
        if keep < Stage::PartitionSet {
            self.partition = None;
        }
        if keep < Stage::ModelDefined {
            self.spec = None;
        }
        if keep < Stage::ModelCompiled {
            self.compiled = None;
        }
        let removed = if keep < Stage::Trained {
            self.trained = None;
            self.run.take()
        } else {
            None
        };
        if keep < Stage::Evaluated {
            self.evaluation = None;
        }
        if keep < Stage::Exported {
            self.last_export = None;
        }
        self.stage = keep;
        removed
    }

    /// Check the slot/stage implications.
    pub fn verify(&self) -> Result<(), String> {
        let s = self.stage;
        if s == Stage::Training {
            return Err("committed stage is training".into());
        }
        implication("dataset", self.dataset.is_some(), s >= Stage::DataLoaded, s)?;
        implication("partition", self.partition.is_some(), s >= Stage::PartitionSet, s)?;
        implication("model spec", self.spec.is_some(), s >= Stage::ModelDefined, s)?;
        implication(
            "compiled model",
            self.compiled.is_some(),
            s >= Stage::ModelCompiled,
            s,
        )?;
        implication("trained model", self.trained.is_some(), s >= Stage::Trained, s)?;
        implication("export receipt", self.last_export.is_some(), s == Stage::Exported, s)?;
        if self.evaluation.is_some() && s < Stage::Evaluated {
            return Err(format!("evaluation is set at stage {s}"));
        }
        if s == Stage::Evaluated && self.evaluation.is_none() {
            return Err("evaluation is missing at stage evaluated".into());
        }
        if self.run.is_some() && self.compiled.is_none() {
            return Err("training run held without a compiled model".into());
        }

        if let (Some(dataset), Some(partition)) = (&self.dataset, &self.partition) {
            partition
                .validate_against(dataset)
                .map_err(|e| e.to_string())?;
        }
        if let (Some(spec), Some(partition)) = (&self.spec, &self.partition) {
            spec.check_partition(partition).map_err(|e| e.to_string())?;
        }
        if let (Some(spec), Some(compiled)) = (&self.spec, &self.compiled) {
            if !Arc::ptr_eq(spec, &compiled.spec) {
                return Err("compiled model was built from a different spec".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedBackend;
    use crate::model::Activation;

    type TestSlots = Slots<ScriptedBackend>;

    fn defined() -> TestSlots {
        let mut slots = TestSlots::default();
        slots.dataset = Some(Arc::new(Dataset::from_rows(&["a", "y"], &[vec![1.0, 2.0]])));
        slots.partition = Some(Partition::new(vec!["a".into()], vec!["y".into()]).unwrap());
        slots.spec = Some(Arc::new(
            ModelSpec::builder("m")
                .input(1)
                .dense(1, Activation::Linear)
                .build()
                .unwrap(),
        ));
        slots.stage = Stage::ModelDefined;
        slots
    }

    #[test]
    fn test_empty_and_defined_slots_verify() {
        assert!(TestSlots::default().verify().is_ok());
        assert!(defined().verify().is_ok());
    }

    #[test]
    fn test_missing_slot_detected() {
        let mut slots = defined();
        slots.partition = None;
        let err = slots.verify().unwrap_err();
        assert!(err.contains("partition is missing"));
    }

    #[test]
    fn test_extra_slot_detected() {
        let mut slots = defined();
        slots.stage = Stage::DataLoaded;
        assert!(slots.verify().is_err());
    }

    #[test]
    fn test_training_is_never_committed() {
        let mut slots = defined();
        slots.stage = Stage::Training;
        assert!(slots.verify().unwrap_err().contains("training"));
    }

    #[test]
    fn test_invalidate_downstream() {
        let mut slots = defined();
        let removed = slots.invalidate_downstream(Stage::DataLoaded);
        assert!(removed.is_none());
        assert_eq!(slots.stage, Stage::DataLoaded);
        assert!(slots.dataset.is_some());
        assert!(slots.partition.is_none());
        assert!(slots.spec.is_none());
        assert!(slots.verify().is_ok());
    }
}
