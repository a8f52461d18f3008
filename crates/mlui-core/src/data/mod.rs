//! Data store: the imported dataset and its feature/target partition.
//!
//! A [`Dataset`] is shared immutably (`Arc<Dataset>`) with every training run
//! that reads it, so replacing the session's dataset never touches data a run
//! is still using.

pub mod dataset;
pub mod partition;

pub use dataset::{Column, ColumnStats, Dataset};
pub use partition::Partition;
