//! Feature/target partition of a dataset.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::backend::TrainingData;
use crate::data::Dataset;
use crate::error::{Result, SessionError};

/// Ordered, disjoint, non-empty sets of feature and target column names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    features: Vec<String>,
    targets: Vec<String>,
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

impl Partition {
    /// Build a partition, dropping repeated names while keeping first-seen
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPartition` if either set is empty or the
    /// sets share a column.
    pub fn new(features: Vec<String>, targets: Vec<String>) -> Result<Self> {
        let features = dedup(features);
        let targets = dedup(targets);

        if features.is_empty() {
            return Err(SessionError::InvalidPartition(
                "at least one feature column is required".into(),
            ));
        }
        if targets.is_empty() {
            return Err(SessionError::InvalidPartition(
                "at least one target column is required".into(),
            ));
        }

        let overlap: Vec<&str> = features
            .iter()
            .filter(|f| targets.contains(f))
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(SessionError::InvalidPartition(format!(
                "columns used as both feature and target: {}",
                overlap.join(", ")
            )));
        }

        Ok(Self { features, targets })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Check that every named column exists in `dataset`.
    pub fn validate_against(&self, dataset: &Dataset) -> Result<()> {
        let unknown: Vec<&str> = self
            .features
            .iter()
            .chain(self.targets.iter())
            .filter(|name| !dataset.has_column(name))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SessionError::InvalidPartition(format!(
                "unknown column(s): {}",
                unknown.join(", ")
            )))
        }
    }

    /// Materialise the feature and target matrices.
    pub fn select(&self, dataset: &Dataset) -> Result<TrainingData> {
        Ok(TrainingData {
            features: dataset.matrix(&self.features)?,
            targets: dataset.matrix(&self.targets)?,
        })
    }
}
