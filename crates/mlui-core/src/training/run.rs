//! Training run records and progress events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::MetricMap;

/// Status of a training run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One training attempt. Only the training controller mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingRun {
    /// Unique identifier for this run.
    pub run_id: Uuid,

    pub status: RunStatus,

    /// Configured epoch count.
    pub total_epochs: usize,

    /// One metric map per recorded epoch, in epoch order.
    pub history: Vec<MetricMap>,

    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// Why the run failed or was cancelled.
    pub diagnostic: Option<String>,

    /// Early stopping ended the run before `total_epochs`.
    pub stopped_early: bool,
}

impl TrainingRun {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            total_epochs,
            history: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            diagnostic: None,
            stopped_early: false,
        }
    }

    pub fn epochs_completed(&self) -> usize {
        self.history.len()
    }

    pub fn latest_metrics(&self) -> Option<&MetricMap> {
        self.history.last()
    }
}

/// Progress published by the training controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainingEvent {
    Epoch {
        run_id: Uuid,
        epoch: usize,
        total_epochs: usize,
        metrics: MetricMap,
    },
    Finished {
        run_id: Uuid,
        status: RunStatus,
        epochs_completed: usize,
        diagnostic: Option<String>,
    },
}

impl TrainingEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            TrainingEvent::Epoch { run_id, .. } | TrainingEvent::Finished { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_run_is_pending_and_empty() {
        let run = TrainingRun::new(5);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.epochs_completed(), 0);
        assert!(run.latest_metrics().is_none());
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_event_serde_tag() {
        let event = TrainingEvent::Finished {
            run_id: Uuid::nil(),
            status: RunStatus::Cancelled,
            epochs_completed: 2,
            diagnostic: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["status"], "cancelled");
    }
}
