//! mlui Core Library
//!
//! The workflow core of mlui: a session state machine that takes a tabular
//! dataset through import, partitioning, model definition, compilation,
//! training, evaluation and export, plus the training controller that drives
//! a backend asynchronously and the artifact contracts around it.
//!
//! The presentation layer only ever sends [`Intent`]s to a [`Session`] and
//! renders [`SessionSnapshot`]s; it never mutates state directly.

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod fakes;
pub mod model;
pub mod obs;
pub mod session;
pub mod telemetry;
pub mod training;

pub use backend::{
    Backend, BackendError, DenseBackend, EpochReport, FitOutcome, MetricMap, TrainingData,
};
pub use config::{ConfigError, SessionConfig};
pub use data::{Column, ColumnStats, Dataset, Partition};
pub use error::{Result, SessionError, ShapeSide};
pub use evaluation::{evaluate, EvaluationReport};
pub use export::{export, load_artifact, ExportError, ExportFormat, ExportReceipt};
pub use model::{
    Activation, CompileConfig, LayerSpec, LossKind, MetricKind, ModelSpec, ModelSpecBuilder,
    ModelSummary, OptimizerConfig,
};
pub use obs::SessionSpan;
pub use session::{
    ArtifactFlags, CompiledModel, Intent, Outcome, Session, SessionSnapshot, Stage,
    StageRequirement, TrainedModel, TrainingMetadata, TrainingProgress,
};
pub use telemetry::{init_tracing, LogFormat};
pub use training::{
    EarlyStopping, RunStatus, TrainingConfig, TrainingController, TrainingEvent, TrainingHandle,
    TrainingRun,
};

/// mlui version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
