//! Training controller: asynchronous fit with progress, cancellation,
//! early stopping and a wall-clock timeout.
//!
//! A run is finalized exactly once. Cancellation discards the run: the epoch
//! that observes the request is not recorded and no trained model is kept.

pub mod config;
pub mod controller;
pub mod early_stopping;
pub mod run;

pub use config::TrainingConfig;
pub use controller::{TrainingController, TrainingHandle};
pub use early_stopping::{EarlyStopping, EarlyStoppingTracker};
pub use run::{RunStatus, TrainingEvent, TrainingRun};
