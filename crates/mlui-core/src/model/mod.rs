//! Model spec builder: layer sequences and compile configuration.

pub mod compile;
pub mod layer;
pub mod spec;

pub use compile::{CompileConfig, LossKind, MetricKind, OptimizerConfig};
pub use layer::{Activation, LayerSpec};
pub use spec::{LayerSummary, ModelSpec, ModelSpecBuilder, ModelSummary};
