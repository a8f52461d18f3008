//! Metrics for a trained model on a holdout set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, MetricMap, TrainingData};
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Always contains `loss`.
    pub metrics: MetricMap,
    pub rows: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    pub fn loss(&self) -> f64 {
        self.metrics.get("loss").copied().unwrap_or(f64::NAN)
    }
}

/// Evaluate `trained` on `holdout`. Reads only its arguments.
///
/// # Errors
///
/// Returns `SessionError::Evaluation` if the backend fails or does not report
/// a loss.
pub fn evaluate<B: Backend>(
    backend: &B,
    trained: &B::Trained,
    holdout: &TrainingData,
) -> Result<EvaluationReport> {
    let metrics = backend
        .evaluate(trained, holdout)
        .map_err(|e| SessionError::Evaluation(e.to_string()))?;
    if !metrics.contains_key("loss") {
        return Err(SessionError::Evaluation(format!(
            "backend `{}` reported no loss",
            backend.name()
        )));
    }
    Ok(EvaluationReport {
        metrics,
        rows: holdout.n_rows(),
        evaluated_at: Utc::now(),
    })
}
