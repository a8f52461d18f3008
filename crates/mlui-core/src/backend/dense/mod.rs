//! Reference backend: sequential dense networks on `ndarray`.

pub mod codec;
pub mod loss;
pub mod network;
pub mod optimizer;

use std::ops::ControlFlow;

use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendError, EpochReport, FitOutcome, MetricMap, TrainingData};
use crate::export::ExportFormat;
use crate::model::{Activation, CompileConfig, LayerSpec, LossKind, ModelSpec};
use crate::training::TrainingConfig;

use network::Network;
use optimizer::Optimizer;

/// Built but not yet compiled.
#[derive(Debug, Clone)]
pub struct DenseModel {
    spec: ModelSpec,
    network: Network,
}

/// Initial weights plus compile configuration. `fit` trains a copy, so one
/// compiled model can seed any number of runs.
#[derive(Debug, Clone)]
pub struct CompiledDense {
    spec: ModelSpec,
    config: CompileConfig,
    network: Network,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedDense {
    pub(crate) spec: ModelSpec,
    pub(crate) config: CompileConfig,
    pub(crate) network: Network,
}

impl TrainedDense {
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn compile_config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }
}

/// Weight initialisation is seeded so that identical specs build identical
/// networks.
#[derive(Debug, Clone)]
pub struct DenseBackend {
    seed: u64,
}

impl Default for DenseBackend {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl DenseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

fn check_data(spec: &ModelSpec, data: &TrainingData) -> Result<(), String> {
    if data.features.nrows() != data.targets.nrows() {
        return Err(format!(
            "{} feature row(s) but {} target row(s)",
            data.features.nrows(),
            data.targets.nrows()
        ));
    }
    if data.features.nrows() == 0 {
        return Err("no rows".into());
    }
    if data.features.ncols() != spec.input_width() {
        return Err(format!(
            "model expects {} feature column(s), got {}",
            spec.input_width(),
            data.features.ncols()
        ));
    }
    if data.targets.ncols() != spec.output_width() {
        return Err(format!(
            "model produces {} output(s), got {} target column(s)",
            spec.output_width(),
            data.targets.ncols()
        ));
    }
    Ok(())
}

fn score(
    network: &Network,
    config: &CompileConfig,
    data: &TrainingData,
) -> Result<MetricMap, BackendError> {
    let pred = network.forward(&data.features)?;
    Ok(loss::report(config, &pred, &data.targets))
}

impl Backend for DenseBackend {
    type Model = DenseModel;
    type Compiled = CompiledDense;
    type Trained = TrainedDense;

    fn name(&self) -> &'static str {
        "dense"
    }

    fn build(&self, spec: &ModelSpec) -> Result<DenseModel, BackendError> {
        spec.validate()
            .map_err(|e| BackendError::Build(e.to_string()))?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        Ok(DenseModel {
            spec: spec.clone(),
            network: Network::from_spec(spec, &mut rng),
        })
    }

    fn compile(
        &self,
        model: DenseModel,
        config: &CompileConfig,
    ) -> Result<CompiledDense, BackendError> {
        config
            .validate()
            .map_err(|e| BackendError::Compile(e.to_string()))?;
        if config.loss == LossKind::BinaryCrossentropy {
            let sigmoid_output = matches!(
                model.spec.layers.last(),
                Some(LayerSpec::Dense {
                    activation: Activation::Sigmoid,
                    ..
                })
            );
            if !sigmoid_output {
                return Err(BackendError::Compile(
                    "binary_crossentropy needs a final dense layer with sigmoid activation"
                        .into(),
                ));
            }
        }
        Ok(CompiledDense {
            spec: model.spec,
            config: config.clone(),
            network: model.network,
        })
    }

    fn fit(
        &self,
        compiled: &CompiledDense,
        data: &TrainingData,
        config: &TrainingConfig,
        on_epoch_end: &mut dyn FnMut(EpochReport) -> ControlFlow<()>,
    ) -> Result<FitOutcome<TrainedDense>, BackendError> {
        check_data(&compiled.spec, data).map_err(BackendError::Training)?;

        let (train, validation) = data.split_validation(config.validation_split);
        let mut network = compiled.network.clone();
        let mut optimizer = Optimizer::new(compiled.config.optimizer.clone());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let mut indices: Vec<usize> = (0..train.n_rows()).collect();
        let batch_size = config.batch_size.max(1);

        let mut epochs_completed = 0;
        let mut interrupted = false;
        for epoch in 1..=config.epochs {
            if config.shuffle {
                indices.shuffle(&mut rng);
            }
            for batch in indices.chunks(batch_size) {
                let x = train.features.select(Axis(0), batch);
                let y = train.targets.select(Axis(0), batch);
                let (pred, caches) = network.forward_train(&x, &mut rng)?;
                let grad = loss::gradient(compiled.config.loss, &pred, &y);
                let grads = network.backward(&caches, grad)?;
                optimizer.step(network.params_mut(), &grads)?;
            }

            let mut metrics = score(&network, &compiled.config, &train)?;
            let train_loss = metrics.get("loss").copied().unwrap_or(f64::NAN);
            if !train_loss.is_finite() {
                return Err(BackendError::Training(format!(
                    "loss is not finite after epoch {epoch}"
                )));
            }
            if let Some(validation) = &validation {
                for (name, value) in score(&network, &compiled.config, validation)? {
                    metrics.insert(format!("val_{name}"), value);
                }
            }

            epochs_completed = epoch;
            if on_epoch_end(EpochReport { epoch, metrics }).is_break() {
                interrupted = true;
                break;
            }
        }

        Ok(FitOutcome {
            model: TrainedDense {
                spec: compiled.spec.clone(),
                config: compiled.config.clone(),
                network,
            },
            epochs_completed,
            interrupted,
        })
    }

    fn evaluate(
        &self,
        trained: &TrainedDense,
        data: &TrainingData,
    ) -> Result<MetricMap, BackendError> {
        check_data(&trained.spec, data).map_err(BackendError::Inference)?;
        score(&trained.network, &trained.config, data)
    }

    fn predict(
        &self,
        trained: &TrainedDense,
        inputs: &Array2<f64>,
    ) -> Result<Array2<f64>, BackendError> {
        trained.network.forward(inputs)
    }

    fn serialize(
        &self,
        trained: &TrainedDense,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError> {
        match format {
            ExportFormat::Json => codec::encode_json(trained),
            ExportFormat::Binary => codec::encode_bin(trained),
        }
    }

    fn load(&self, bytes: &[u8], format: ExportFormat) -> Result<TrainedDense, BackendError> {
        match format {
            ExportFormat::Json => codec::decode_json(bytes),
            ExportFormat::Binary => codec::decode_bin(bytes),
        }
    }
}
