//! Losses, their gradients and reported metrics.

use ndarray::{Array2, Zip};

use crate::backend::MetricMap;
use crate::model::{CompileConfig, LossKind, MetricKind};

const BCE_EPS: f64 = 1e-7;

pub fn loss(kind: LossKind, pred: &Array2<f64>, target: &Array2<f64>) -> f64 {
    let n = pred.len().max(1) as f64;
    match kind {
        LossKind::Mse => Zip::from(pred)
            .and(target)
            .fold(0.0, |acc, &p, &y| acc + (p - y).powi(2))
            / n,
        LossKind::Mae => Zip::from(pred)
            .and(target)
            .fold(0.0, |acc, &p, &y| acc + (p - y).abs())
            / n,
        LossKind::BinaryCrossentropy => {
            -Zip::from(pred).and(target).fold(0.0, |acc, &p, &y| {
                let p = p.clamp(BCE_EPS, 1.0 - BCE_EPS);
                acc + y * p.ln() + (1.0 - y) * (1.0 - p).ln()
            }) / n
        }
    }
}

/// Gradient of [`loss`] with respect to `pred`.
pub fn gradient(kind: LossKind, pred: &Array2<f64>, target: &Array2<f64>) -> Array2<f64> {
    let n = pred.len().max(1) as f64;
    let mut grad = Array2::zeros(pred.raw_dim());
    match kind {
        LossKind::Mse => Zip::from(&mut grad)
            .and(pred)
            .and(target)
            .for_each(|g, &p, &y| *g = 2.0 * (p - y) / n),
        LossKind::Mae => Zip::from(&mut grad)
            .and(pred)
            .and(target)
            .for_each(|g, &p, &y| *g = (p - y).signum() / n),
        LossKind::BinaryCrossentropy => {
            Zip::from(&mut grad)
                .and(pred)
                .and(target)
                .for_each(|g, &p, &y| {
                    let p = p.clamp(BCE_EPS, 1.0 - BCE_EPS);
                    *g = (p - y) / (p * (1.0 - p)) / n;
                })
        }
    }
    grad
}

pub fn metric(kind: MetricKind, pred: &Array2<f64>, target: &Array2<f64>) -> f64 {
    match kind {
        MetricKind::Mse => loss(LossKind::Mse, pred, target),
        MetricKind::Mae => loss(LossKind::Mae, pred, target),
        MetricKind::Rmse => loss(LossKind::Mse, pred, target).sqrt(),
        MetricKind::Accuracy => {
            let n = pred.len().max(1) as f64;
            let hits = Zip::from(pred).and(target).fold(0.0, |acc, &p, &y| {
                let label = if p >= 0.5 { 1.0 } else { 0.0 };
                if (label - y).abs() < 0.5 {
                    acc + 1.0
                } else {
                    acc
                }
            });
            hits / n
        }
    }
}

/// `loss` plus every compiled metric.
pub fn report(config: &CompileConfig, pred: &Array2<f64>, target: &Array2<f64>) -> MetricMap {
    let mut map = MetricMap::new();
    map.insert("loss".to_string(), loss(config.loss, pred, target));
    for kind in &config.metrics {
        map.insert(kind.name().to_string(), metric(*kind, pred, target));
    }
    map
}
