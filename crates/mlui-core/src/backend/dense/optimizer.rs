//! Parameter update rules.

use ndarray::{Array2, Zip};

use crate::backend::BackendError;
use crate::model::OptimizerConfig;

/// Optimizer state for one training run. Moment buffers are created on the
/// first step, one per parameter tensor.
pub struct Optimizer {
    config: OptimizerConfig,
    step: i32,
    first: Vec<Array2<f64>>,
    second: Vec<Array2<f64>>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            step: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn step(
        &mut self,
        params: Vec<&mut Array2<f64>>,
        grads: &[Array2<f64>],
    ) -> Result<(), BackendError> {
        if params.len() != grads.len() {
            return Err(BackendError::Training(format!(
                "{} parameter tensor(s) but {} gradient(s)",
                params.len(),
                grads.len()
            )));
        }
        if self.first.len() != params.len() {
            self.first = params.iter().map(|p| Array2::zeros(p.raw_dim())).collect();
            self.second = params.iter().map(|p| Array2::zeros(p.raw_dim())).collect();
        }
        self.step += 1;

        for (i, (param, grad)) in params.into_iter().zip(grads).enumerate() {
            if param.dim() != grad.dim() {
                return Err(BackendError::Training(format!(
                    "gradient {i} has shape {:?}, parameter has {:?}",
                    grad.dim(),
                    param.dim()
                )));
            }
            match self.config {
                OptimizerConfig::Sgd {
                    learning_rate,
                    momentum,
                } => Zip::from(param)
                    .and(grad)
                    .and(&mut self.first[i])
                    .for_each(|p, &g, v| {
                        *v = momentum * *v - learning_rate * g;
                        *p += *v;
                    }),
                OptimizerConfig::RmsProp {
                    learning_rate,
                    rho,
                    epsilon,
                } => Zip::from(param)
                    .and(grad)
                    .and(&mut self.second[i])
                    .for_each(|p, &g, s| {
                        *s = rho * *s + (1.0 - rho) * g * g;
                        *p -= learning_rate * g / (s.sqrt() + epsilon);
                    }),
                OptimizerConfig::Adam {
                    learning_rate,
                    beta1,
                    beta2,
                    epsilon,
                } => {
                    let c1 = 1.0 - beta1.powi(self.step);
                    let c2 = 1.0 - beta2.powi(self.step);
                    Zip::from(param)
                        .and(grad)
                        .and(&mut self.first[i])
                        .and(&mut self.second[i])
                        .for_each(|p, &g, m, v| {
                            *m = beta1 * *m + (1.0 - beta1) * g;
                            *v = beta2 * *v + (1.0 - beta2) * g * g;
                            let m_hat = *m / c1;
                            let v_hat = *v / c2;
                            *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                        });
                }
            }
        }
        Ok(())
    }
}
