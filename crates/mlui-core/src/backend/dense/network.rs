//! Sequential network of dense, dropout and batch-normalization layers.

use ndarray::{Array2, Axis, Zip};
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::backend::BackendError;
use crate::model::{Activation, LayerSpec, ModelSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenseLayer {
    Dense {
        weights: Array2<f64>,
        bias: Array2<f64>,
        activation: Activation,
    },
    Dropout {
        rate: f64,
    },
    BatchNorm {
        gamma: Array2<f64>,
        beta: Array2<f64>,
        moving_mean: Array2<f64>,
        moving_var: Array2<f64>,
        momentum: f64,
        epsilon: f64,
    },
}

/// Values a training-mode forward pass keeps for the backward pass.
#[derive(Debug)]
pub(crate) enum Cache {
    Dense { input: Array2<f64>, z: Array2<f64> },
    Dropout { mask: Array2<f64> },
    BatchNorm { x_hat: Array2<f64>, inv_std: Array2<f64> },
}

fn activate(activation: Activation, z: &Array2<f64>) -> Array2<f64> {
    match activation {
        Activation::Linear => z.clone(),
        Activation::Relu => z.mapv(|v| v.max(0.0)),
        Activation::Tanh => z.mapv(f64::tanh),
        Activation::Sigmoid => z.mapv(sigmoid),
    }
}

fn activation_grad(activation: Activation, z: &Array2<f64>) -> Array2<f64> {
    match activation {
        Activation::Linear => Array2::ones(z.raw_dim()),
        Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
        Activation::Sigmoid => z.mapv(|v| {
            let s = sigmoid(v);
            s * (1.0 - s)
        }),
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn column_mean(x: &Array2<f64>) -> Result<Array2<f64>, BackendError> {
    x.mean_axis(Axis(0))
        .map(|m| m.insert_axis(Axis(0)))
        .ok_or_else(|| BackendError::Training("empty batch".into()))
}

impl DenseLayer {
    fn from_spec(layer: &LayerSpec, input: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        match layer {
            LayerSpec::Dense { units, activation } => {
                // Glorot uniform
                let limit = (6.0 / (input + units) as f64).sqrt();
                let weights =
                    Array2::from_shape_fn((input, *units), |_| rng.gen_range(-limit..limit));
                DenseLayer::Dense {
                    weights,
                    bias: Array2::zeros((1, *units)),
                    activation: *activation,
                }
            }
            LayerSpec::Dropout { rate } => DenseLayer::Dropout { rate: *rate },
            LayerSpec::BatchNormalization { momentum, epsilon } => DenseLayer::BatchNorm {
                gamma: Array2::ones((1, input)),
                beta: Array2::zeros((1, input)),
                moving_mean: Array2::zeros((1, input)),
                moving_var: Array2::ones((1, input)),
                momentum: *momentum,
                epsilon: *epsilon,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DenseLayer::Dense { .. } => "dense",
            DenseLayer::Dropout { .. } => "dropout",
            DenseLayer::BatchNorm { .. } => "batch_normalization",
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            DenseLayer::Dense {
                weights,
                bias,
                activation,
            } => activate(*activation, &(x.dot(weights) + bias)),
            DenseLayer::Dropout { .. } => x.clone(),
            DenseLayer::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_var,
                epsilon,
                ..
            } => {
                let inv_std = moving_var.mapv(|v| 1.0 / (v + epsilon).sqrt());
                (x - moving_mean) * &inv_std * gamma + beta
            }
        }
    }

    fn forward_train(
        &mut self,
        x: &Array2<f64>,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<(Array2<f64>, Cache), BackendError> {
        match self {
            DenseLayer::Dense {
                weights,
                bias,
                activation,
            } => {
                let z = x.dot(&*weights) + &*bias;
                let out = activate(*activation, &z);
                Ok((
                    out,
                    Cache::Dense {
                        input: x.clone(),
                        z,
                    },
                ))
            }
            DenseLayer::Dropout { rate } => {
                let keep = 1.0 - *rate;
                let mask = Array2::from_shape_fn(x.raw_dim(), |_| {
                    if rng.gen::<f64>() < *rate {
                        0.0
                    } else {
                        1.0 / keep
                    }
                });
                Ok((x * &mask, Cache::Dropout { mask }))
            }
            DenseLayer::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_var,
                momentum,
                epsilon,
            } => {
                let mean = column_mean(x)?;
                let centered = x - &mean;
                let var = column_mean(&centered.mapv(|v| v * v))?;
                let inv_std = var.mapv(|v| 1.0 / (v + *epsilon).sqrt());
                let x_hat = &centered * &inv_std;
                let out = &x_hat * &*gamma + &*beta;

                let m = *momentum;
                Zip::from(&mut *moving_mean)
                    .and(&mean)
                    .for_each(|running, &batch| *running = *running * m + batch * (1.0 - m));
                Zip::from(&mut *moving_var)
                    .and(&var)
                    .for_each(|running, &batch| *running = *running * m + batch * (1.0 - m));

                Ok((out, Cache::BatchNorm { x_hat, inv_std }))
            }
        }
    }

    /// Returns the gradient for the layer input and the parameter gradients
    /// in the order of [`DenseLayer::params_mut`].
    fn backward(
        &self,
        cache: &Cache,
        grad: Array2<f64>,
    ) -> Result<(Array2<f64>, Vec<Array2<f64>>), BackendError> {
        match (self, cache) {
            (
                DenseLayer::Dense {
                    weights,
                    activation,
                    ..
                },
                Cache::Dense { input, z },
            ) => {
                let grad_z = grad * activation_grad(*activation, z);
                let grad_w = input.t().dot(&grad_z);
                let grad_b = grad_z.sum_axis(Axis(0)).insert_axis(Axis(0));
                let grad_in = grad_z.dot(&weights.t());
                Ok((grad_in, vec![grad_w, grad_b]))
            }
            (DenseLayer::Dropout { .. }, Cache::Dropout { mask }) => Ok((grad * mask, Vec::new())),
            (DenseLayer::BatchNorm { gamma, .. }, Cache::BatchNorm { x_hat, inv_std }) => {
                let n = grad.nrows() as f64;
                let grad_gamma = (&grad * x_hat).sum_axis(Axis(0)).insert_axis(Axis(0));
                let grad_beta = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
                let grad_xhat = &grad * gamma;
                let sum_dxhat = grad_xhat.sum_axis(Axis(0)).insert_axis(Axis(0));
                let sum_dxhat_xhat = (&grad_xhat * x_hat)
                    .sum_axis(Axis(0))
                    .insert_axis(Axis(0));
                let grad_in =
                    (grad_xhat * n - &sum_dxhat - x_hat * &sum_dxhat_xhat) * inv_std / n;
                Ok((grad_in, vec![grad_gamma, grad_beta]))
            }
            (layer, _) => Err(BackendError::Training(format!(
                "backward cache does not match {} layer",
                layer.kind()
            ))),
        }
    }

    fn params_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            DenseLayer::Dense { weights, bias, .. } => vec![weights, bias],
            DenseLayer::Dropout { .. } => Vec::new(),
            DenseLayer::BatchNorm { gamma, beta, .. } => vec![gamma, beta],
        }
    }

    fn state(&self) -> Vec<&Array2<f64>> {
        match self {
            DenseLayer::Dense { weights, bias, .. } => vec![weights, bias],
            DenseLayer::Dropout { .. } => Vec::new(),
            DenseLayer::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_var,
                ..
            } => vec![gamma, beta, moving_mean, moving_var],
        }
    }

    fn state_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            DenseLayer::Dense { weights, bias, .. } => vec![weights, bias],
            DenseLayer::Dropout { .. } => Vec::new(),
            DenseLayer::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_var,
                ..
            } => vec![gamma, beta, moving_mean, moving_var],
        }
    }
}

/// A sequential network instantiated from a [`ModelSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    input_units: usize,
    layers: Vec<DenseLayer>,
}

impl Network {
    pub fn from_spec(spec: &ModelSpec, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut width = spec.input_units;
        let layers = spec
            .layers
            .iter()
            .map(|layer| {
                let built = DenseLayer::from_spec(layer, width, rng);
                width = layer.output_width(width);
                built
            })
            .collect();
        Self {
            input_units: spec.input_units,
            layers,
        }
    }

    pub fn input_units(&self) -> usize {
        self.input_units
    }

    /// Inference-mode forward pass: dropout is the identity and batch
    /// normalization uses its moving statistics.
    pub fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>, BackendError> {
        if x.ncols() != self.input_units {
            return Err(BackendError::Inference(format!(
                "expected {} input column(s), got {}",
                self.input_units,
                x.ncols()
            )));
        }
        Ok(self
            .layers
            .iter()
            .fold(x.clone(), |acc, layer| layer.forward(&acc)))
    }

    pub(crate) fn forward_train(
        &mut self,
        x: &Array2<f64>,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<(Array2<f64>, Vec<Cache>), BackendError> {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut acc = x.clone();
        for layer in &mut self.layers {
            let (out, cache) = layer.forward_train(&acc, rng)?;
            caches.push(cache);
            acc = out;
        }
        Ok((acc, caches))
    }

    /// Gradients of every trainable parameter, ordered like
    /// [`Network::params_mut`].
    pub(crate) fn backward(
        &self,
        caches: &[Cache],
        grad_output: Array2<f64>,
    ) -> Result<Vec<Array2<f64>>, BackendError> {
        if caches.len() != self.layers.len() {
            return Err(BackendError::Training(format!(
                "expected {} cached layer(s), got {}",
                self.layers.len(),
                caches.len()
            )));
        }
        let mut grad = grad_output;
        let mut per_layer = Vec::with_capacity(self.layers.len());
        for (layer, cache) in self.layers.iter().zip(caches).rev() {
            let (grad_in, params) = layer.backward(cache, grad)?;
            per_layer.push(params);
            grad = grad_in;
        }
        Ok(per_layer.into_iter().rev().flatten().collect())
    }

    pub(crate) fn params_mut(&mut self) -> Vec<&mut Array2<f64>> {
        self.layers
            .iter_mut()
            .flat_map(DenseLayer::params_mut)
            .collect()
    }

    /// Every persisted tensor, trainable or not, in layer order.
    pub fn state_tensors(&self) -> Vec<&Array2<f64>> {
        self.layers.iter().flat_map(DenseLayer::state).collect()
    }

    pub fn state_tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        self.layers
            .iter_mut()
            .flat_map(DenseLayer::state_mut)
            .collect()
    }

    /// Check that `self` has the layer kinds and tensor shapes of `other`.
    pub fn check_layout(&self, other: &Network) -> Result<(), BackendError> {
        let kinds = |n: &Network| n.layers.iter().map(DenseLayer::kind).collect::<Vec<_>>();
        if self.input_units != other.input_units || kinds(self) != kinds(other) {
            return Err(BackendError::Serialization(
                "network layers do not match the architecture".into(),
            ));
        }
        let shapes = |n: &Network| {
            n.state_tensors()
                .iter()
                .map(|t| t.dim())
                .collect::<Vec<_>>()
        };
        if shapes(self) != shapes(other) {
            return Err(BackendError::Serialization(
                "weight shapes do not match the architecture".into(),
            ));
        }
        Ok(())
    }
}
