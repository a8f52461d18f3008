//! Layer descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Largest unit count accepted for a dense layer.
pub const MAX_UNITS: usize = 10_000;

pub const DEFAULT_BN_MOMENTUM: f64 = 0.99;
pub const DEFAULT_BN_EPSILON: f64 = 1e-3;

/// Element-wise activation applied after a dense layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            other => Err(SessionError::InvalidModelSpec(format!(
                "unknown activation `{other}`"
            ))),
        }
    }
}

fn default_momentum() -> f64 {
    DEFAULT_BN_MOMENTUM
}

fn default_epsilon() -> f64 {
    DEFAULT_BN_EPSILON
}

/// One entry of a sequential model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    Dropout {
        rate: f64,
    },
    BatchNormalization {
        #[serde(default = "default_momentum")]
        momentum: f64,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
}

impl LayerSpec {
    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerSpec::Dense { units, activation }
    }

    pub fn dropout(rate: f64) -> Self {
        LayerSpec::Dropout { rate }
    }

    pub fn batch_norm() -> Self {
        LayerSpec::BatchNormalization {
            momentum: DEFAULT_BN_MOMENTUM,
            epsilon: DEFAULT_BN_EPSILON,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Dropout { .. } => "dropout",
            LayerSpec::BatchNormalization { .. } => "batch_normalization",
        }
    }

    /// Width of this layer's output given the width of its input.
    pub fn output_width(&self, input: usize) -> usize {
        match self {
            LayerSpec::Dense { units, .. } => *units,
            LayerSpec::Dropout { .. } | LayerSpec::BatchNormalization { .. } => input,
        }
    }

    /// Number of parameters, counting batch-norm moving statistics.
    pub fn param_count(&self, input: usize) -> usize {
        match self {
            LayerSpec::Dense { units, .. } => input * units + units,
            LayerSpec::Dropout { .. } => 0,
            LayerSpec::BatchNormalization { .. } => 4 * input,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            LayerSpec::Dense { units, .. } => {
                if *units == 0 || *units > MAX_UNITS {
                    return Err(SessionError::InvalidModelSpec(format!(
                        "dense units must be in 1..={MAX_UNITS}, got {units}"
                    )));
                }
            }
            LayerSpec::Dropout { rate } => {
                if !(*rate > 0.0 && *rate < 1.0) {
                    return Err(SessionError::InvalidModelSpec(format!(
                        "dropout rate must be in (0, 1), got {rate}"
                    )));
                }
            }
            LayerSpec::BatchNormalization { momentum, epsilon } => {
                if !(*momentum > 0.0 && *momentum <= 1.0) {
                    return Err(SessionError::InvalidModelSpec(format!(
                        "batch normalization momentum must be in (0, 1], got {momentum}"
                    )));
                }
                if !(*epsilon > 0.0 && epsilon.is_finite()) {
                    return Err(SessionError::InvalidModelSpec(format!(
                        "batch normalization epsilon must be positive, got {epsilon}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSpec::Dense { units, activation } => write!(f, "dense:{units}:{activation}"),
            LayerSpec::Dropout { rate } => write!(f, "dropout:{rate}"),
            LayerSpec::BatchNormalization { momentum, epsilon } => {
                write!(f, "batchnorm:{momentum}:{epsilon}")
            }
        }
    }
}

fn parse_number<T: FromStr>(value: &str, what: &str, layer: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        SessionError::InvalidModelSpec(format!("invalid {what} `{value}` in layer `{layer}`"))
    })
}

/// Parses `dense:UNITS[:ACTIVATION]`, `dropout:RATE` and
/// `batchnorm[:MOMENTUM[:EPSILON]]`. The parsed layer is validated.
impl FromStr for LayerSpec {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let layer = match parts.as_slice() {
            ["dense", units] => LayerSpec::Dense {
                units: parse_number(units, "units", s)?,
                activation: Activation::Linear,
            },
            ["dense", units, activation] => LayerSpec::Dense {
                units: parse_number(units, "units", s)?,
                activation: activation.parse()?,
            },
            ["dropout", rate] => LayerSpec::Dropout {
                rate: parse_number(rate, "rate", s)?,
            },
            ["batchnorm"] | ["batch_normalization"] => LayerSpec::batch_norm(),
            ["batchnorm" | "batch_normalization", momentum] => LayerSpec::BatchNormalization {
                momentum: parse_number(momentum, "momentum", s)?,
                epsilon: DEFAULT_BN_EPSILON,
            },
            ["batchnorm" | "batch_normalization", momentum, epsilon] => {
                LayerSpec::BatchNormalization {
                    momentum: parse_number(momentum, "momentum", s)?,
                    epsilon: parse_number(epsilon, "epsilon", s)?,
                }
            }
            _ => {
                return Err(SessionError::InvalidModelSpec(format!(
                    "unrecognised layer `{s}`"
                )))
            }
        };
        layer.validate()?;
        Ok(layer)
    }
}
