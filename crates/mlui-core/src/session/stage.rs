//! Workflow stages and the gating requirements operations declare.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position in the workflow. Variants are declared in their total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    DataLoaded,
    PartitionSet,
    ModelDefined,
    ModelCompiled,
    Training,
    Trained,
    Evaluated,
    Exported,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Empty,
        Stage::DataLoaded,
        Stage::PartitionSet,
        Stage::ModelDefined,
        Stage::ModelCompiled,
        Stage::Training,
        Stage::Trained,
        Stage::Evaluated,
        Stage::Exported,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Empty => "empty",
            Stage::DataLoaded => "data_loaded",
            Stage::PartitionSet => "partition_set",
            Stage::ModelDefined => "model_defined",
            Stage::ModelCompiled => "model_compiled",
            Stage::Training => "training",
            Stage::Trained => "trained",
            Stage::Evaluated => "evaluated",
            Stage::Exported => "exported",
        }
    }

    /// The following stage, or `None` at `Exported`.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an operation needs from the session before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRequirement {
    AtLeast(Stage),
    Exactly(Stage),
    NoRunningTraining,
    TrainingRun,
    FinishedTrainingRun,
}

impl fmt::Display for StageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRequirement::AtLeast(stage) => write!(f, "stage {stage} or later"),
            StageRequirement::Exactly(stage) => write!(f, "stage {stage}"),
            StageRequirement::NoRunningTraining => f.write_str("no running training"),
            StageRequirement::TrainingRun => f.write_str("a training run"),
            StageRequirement::FinishedTrainingRun => f.write_str("a finished training run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Stage::Exported.next(), None);
    }

    #[test]
    fn test_serde_matches_display() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }

    #[test]
    fn test_requirement_display() {
        assert_eq!(
            StageRequirement::AtLeast(Stage::Trained).to_string(),
            "stage trained or later"
        );
        assert_eq!(
            StageRequirement::FinishedTrainingRun.to_string(),
            "a finished training run"
        );
    }
}
