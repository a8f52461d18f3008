//! Sequential model definitions and their builder.

use serde::{Deserialize, Serialize};

use crate::data::Partition;
use crate::error::{Result, SessionError, ShapeSide};
use crate::model::layer::{Activation, LayerSpec};

/// Model name, declared input width and ordered layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub input_units: usize,
    pub layers: Vec<LayerSpec>,
}

/// Per-layer line of a [`ModelSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub index: usize,
    pub kind: String,
    pub description: String,
    pub output_width: usize,
    pub params: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub input_units: usize,
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
}

impl ModelSpec {
    pub fn builder(name: impl Into<String>) -> ModelSpecBuilder {
        ModelSpecBuilder::new(name)
    }

    pub fn input_width(&self) -> usize {
        self.input_units
    }

    /// Width produced by the last layer.
    pub fn output_width(&self) -> usize {
        self.layers
            .iter()
            .fold(self.input_units, |width, layer| layer.output_width(width))
    }

    /// Structural checks that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SessionError::InvalidModelSpec(
                "model name must not be empty".into(),
            ));
        }
        if self.input_units == 0 {
            return Err(SessionError::InvalidModelSpec(
                "input width must be at least 1".into(),
            ));
        }
        if self.layers.is_empty() {
            return Err(SessionError::InvalidModelSpec(
                "model has no layers".into(),
            ));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            layer.validate().map_err(|e| match e {
                SessionError::InvalidModelSpec(msg) => {
                    SessionError::InvalidModelSpec(format!("layer {index}: {msg}"))
                }
                other => other,
            })?;
        }
        if !self
            .layers
            .iter()
            .any(|l| matches!(l, LayerSpec::Dense { .. }))
        {
            return Err(SessionError::InvalidModelSpec(
                "model needs at least one dense layer".into(),
            ));
        }
        Ok(())
    }

    /// Check the declared widths against a partition's cardinalities.
    pub fn check_partition(&self, partition: &Partition) -> Result<()> {
        let features = partition.features().len();
        if self.input_width() != features {
            return Err(SessionError::ShapeMismatch {
                side: ShapeSide::Input,
                declared: self.input_width(),
                expected: features,
            });
        }
        let targets = partition.targets().len();
        if self.output_width() != targets {
            return Err(SessionError::ShapeMismatch {
                side: ShapeSide::Output,
                declared: self.output_width(),
                expected: targets,
            });
        }
        Ok(())
    }

    /// Activation of the last dense layer.
    pub fn output_activation(&self) -> Option<Activation> {
        self.layers.iter().rev().find_map(|l| match l {
            LayerSpec::Dense { activation, .. } => Some(*activation),
            _ => None,
        })
    }

    pub fn summary(&self) -> ModelSummary {
        let mut width = self.input_units;
        let layers: Vec<LayerSummary> = self
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                let params = layer.param_count(width);
                width = layer.output_width(width);
                LayerSummary {
                    index,
                    kind: layer.kind().to_string(),
                    description: layer.to_string(),
                    output_width: width,
                    params,
                }
            })
            .collect();
        let total_params = layers.iter().map(|l| l.params).sum();
        ModelSummary {
            name: self.name.clone(),
            input_units: self.input_units,
            layers,
            total_params,
        }
    }
}

/// Incremental construction of a [`ModelSpec`].
#[derive(Debug, Clone)]
pub struct ModelSpecBuilder {
    name: String,
    input_units: usize,
    layers: Vec<LayerSpec>,
}

impl ModelSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_units: 0,
            layers: Vec::new(),
        }
    }

    pub fn input(mut self, units: usize) -> Self {
        self.input_units = units;
        self
    }

    pub fn dense(self, units: usize, activation: Activation) -> Self {
        self.layer(LayerSpec::dense(units, activation))
    }

    pub fn dropout(self, rate: f64) -> Self {
        self.layer(LayerSpec::dropout(rate))
    }

    pub fn batch_norm(self) -> Self {
        self.layer(LayerSpec::batch_norm())
    }

    pub fn layer(mut self, layer: LayerSpec) -> Self {
        self.layers.push(layer);
        self
    }

    /// Insert at `index`, clamped to the end of the sequence.
    pub fn insert(mut self, index: usize, layer: LayerSpec) -> Self {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self
    }

    /// Remove the layer at `index`; out-of-range indices are ignored.
    pub fn remove(mut self, index: usize) -> Self {
        if index < self.layers.len() {
            self.layers.remove(index);
        }
        self
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn build(self) -> Result<ModelSpec> {
        let spec = ModelSpec {
            name: self.name,
            input_units: self.input_units,
            layers: self.layers,
        };
        spec.validate()?;
        Ok(spec)
    }
}
