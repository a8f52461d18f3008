//! Tabular dataset snapshot.

use std::collections::HashSet;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// A named numeric column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered table of named columns.
///
/// Construction is unchecked so that import collaborators can hand over
/// whatever they parsed; [`Dataset::validate`] is applied when the dataset
/// enters a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

/// Summary statistics for one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (zero for fewer than two values).
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Build a dataset from column names and row-major values.
    pub fn from_rows(names: &[&str], rows: &[Vec<f64>]) -> Self {
        let columns = names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                Column::new(
                    *name,
                    rows.iter()
                        .map(|row| row.get(j).copied().unwrap_or(f64::NAN))
                        .collect(),
                )
            })
            .collect();
        Self { columns }
    }

    /// Build a dataset whose columns are the columns of `matrix`.
    pub fn from_matrix(names: &[String], matrix: &Array2<f64>) -> Self {
        let columns = names
            .iter()
            .zip(matrix.columns())
            .map(|(name, values)| Column::new(name.clone(), values.to_vec()))
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Row count, taken from the first column.
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.n_rows() == 0
    }

    /// Check that the dataset can enter a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidData` if the dataset has no rows, fewer
    /// than two columns, an empty or duplicate column name, columns of
    /// different lengths, or a non-finite value.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SessionError::InvalidData("dataset is empty".into()));
        }
        if self.columns.len() < 2 {
            return Err(SessionError::InvalidData(format!(
                "dataset needs at least 2 columns, found {}",
                self.columns.len()
            )));
        }

        let rows = self.n_rows();
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(SessionError::InvalidData("column name must not be empty".into()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SessionError::InvalidData(format!(
                    "duplicate column `{}`",
                    column.name
                )));
            }
            if column.values.len() != rows {
                return Err(SessionError::InvalidData(format!(
                    "column `{}` has {} values, expected {}",
                    column.name,
                    column.values.len(),
                    rows
                )));
            }
            if let Some(row) = column.values.iter().position(|v| !v.is_finite()) {
                return Err(SessionError::InvalidData(format!(
                    "column `{}` has a non-finite value at row {}",
                    column.name, row
                )));
            }
        }
        Ok(())
    }

    /// Gather the named columns into a row-major matrix.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidData` if a column is missing or its
    /// length differs from the dataset row count.
    pub fn matrix(&self, names: &[String]) -> Result<Array2<f64>> {
        let rows = self.n_rows();
        let mut out = Array2::zeros((rows, names.len()));
        for (j, name) in names.iter().enumerate() {
            let column = self
                .column(name)
                .ok_or_else(|| SessionError::InvalidData(format!("missing column `{name}`")))?;
            if column.values.len() != rows {
                return Err(SessionError::InvalidData(format!(
                    "column `{name}` has {} values, expected {rows}",
                    column.values.len()
                )));
            }
            for (i, value) in column.values.iter().enumerate() {
                out[[i, j]] = *value;
            }
        }
        Ok(out)
    }

    /// Per-column count, mean, standard deviation, minimum and maximum.
    pub fn describe(&self) -> Vec<ColumnStats> {
        self.columns
            .iter()
            .map(|column| {
                let count = column.values.len();
                let mean = if count == 0 {
                    0.0
                } else {
                    column.values.iter().sum::<f64>() / count as f64
                };
                let std = if count < 2 {
                    0.0
                } else {
                    let ss: f64 = column.values.iter().map(|v| (v - mean).powi(2)).sum();
                    (ss / (count - 1) as f64).sqrt()
                };
                let min = column.values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = column
                    .values
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                ColumnStats {
                    name: column.name.clone(),
                    count,
                    mean,
                    std,
                    min,
                    max,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_rows(
            &["a", "b", "y"],
            &[vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0], vec![3.0, 6.0, 9.0]],
        )
    }

    #[test]
    fn test_valid_dataset_passes() {
        let ds = sample();
        assert!(ds.validate().is_ok());
        assert_eq!(ds.n_rows(), 3);
        assert_eq!(ds.n_columns(), 3);
        assert_eq!(ds.column_names(), vec!["a", "b", "y"]);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let err = Dataset::default().validate().unwrap_err();
        assert!(matches!(err, SessionError::InvalidData(_)));

        let no_rows = Dataset::new(vec![Column::new("a", vec![]), Column::new("b", vec![])]);
        assert!(matches!(no_rows.validate(), Err(SessionError::InvalidData(_))));
    }

    #[test]
    fn test_single_column_rejected() {
        let ds = Dataset::new(vec![Column::new("a", vec![1.0, 2.0])]);
        let err = ds.validate().unwrap_err();
        assert!(err.to_string().contains("at least 2 columns"));
    }

    #[test]
    fn test_ragged_and_duplicate_columns_rejected() {
        let ragged = Dataset::new(vec![
            Column::new("a", vec![1.0, 2.0]),
            Column::new("b", vec![1.0]),
        ]);
        assert!(ragged.validate().unwrap_err().to_string().contains("`b`"));

        let dup = Dataset::new(vec![
            Column::new("a", vec![1.0]),
            Column::new("a", vec![2.0]),
        ]);
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let ds = Dataset::new(vec![
            Column::new("a", vec![1.0, f64::NAN]),
            Column::new("b", vec![1.0, 2.0]),
        ]);
        assert!(ds.validate().unwrap_err().to_string().contains("row 1"));
    }

    #[test]
    fn test_matrix_selects_columns_in_order() {
        let ds = sample();
        let m = ds.matrix(&["y".to_string(), "a".to_string()]).unwrap();
        assert_eq!(m.dim(), (3, 2));
        assert_eq!(m[[0, 0]], 3.0);
        assert_eq!(m[[2, 1]], 3.0);
        assert!(ds.matrix(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_describe() {
        let stats = sample().describe();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].name, "a");
        assert_eq!(stats[0].count, 3);
        assert!((stats[0].mean - 2.0).abs() < 1e-12);
        assert!((stats[0].std - 1.0).abs() < 1e-12);
        assert_eq!(stats[0].min, 1.0);
        assert_eq!(stats[0].max, 3.0);
    }

    #[test]
    fn test_from_matrix_roundtrips_columns() {
        let ds = sample();
        let names = vec!["a".to_string(), "y".to_string()];
        let m = ds.matrix(&names).unwrap();
        let back = Dataset::from_matrix(&names, &m);
        assert_eq!(back.column("y").unwrap().values, vec![3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_dataset_json_shape() {
        let json = serde_json::json!({
            "columns": [
                {"name": "x", "values": [1.0, 2.0]},
                {"name": "y", "values": [0.0, 1.0]}
            ]
        });
        let ds: Dataset = serde_json::from_value(json).unwrap();
        assert!(ds.validate().is_ok());
        assert_eq!(ds.n_rows(), 2);
    }
}
