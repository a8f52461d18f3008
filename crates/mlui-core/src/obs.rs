//! Structured observability hooks for session and training lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for stage transitions, rejected operations, training
//!   progress and exports
//!
//! Every event carries an `event = "..."` field so log pipelines can filter on
//! it. Output format is chosen by [`crate::telemetry::init_tracing`].

use std::fmt::Display;
use std::path::Path;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::session::Stage;
use crate::training::RunStatus;

/// RAII guard that enters a session-scoped span.
///
/// # Example
///
/// ```ignore
/// let _span = SessionSpan::enter(session.id());
/// // events below carry session_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: Uuid) -> Self {
        let span = tracing::info_span!("mlui.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_session_created(session_id: Uuid, backend: &str) {
    info!(event = "session.created", session_id = %session_id, backend = %backend);
}

/// Emit event: a committed operation moved the session between stages.
pub fn emit_stage_transition(session_id: Uuid, operation: &str, from: Stage, to: Stage) {
    info!(
        event = "session.stage_transition",
        session_id = %session_id,
        operation = %operation,
        from = %from,
        to = %to,
    );
}

/// Emit event: an operation was refused before touching state (warning level).
pub fn emit_operation_rejected(session_id: Uuid, operation: &str, error: &dyn Display) {
    warn!(
        event = "session.operation_rejected",
        session_id = %session_id,
        operation = %operation,
        error = %error,
    );
}

/// Emit event: a staged mutation broke a slot invariant and was dropped.
pub fn emit_invariant_violation(session_id: Uuid, operation: &str, detail: &str) {
    error!(
        event = "session.invariant_violation",
        session_id = %session_id,
        operation = %operation,
        detail = %detail,
    );
}

pub fn emit_training_started(run_id: Uuid, total_epochs: usize) {
    info!(event = "training.started", run_id = %run_id, total_epochs = total_epochs);
}

pub fn emit_epoch_completed(run_id: Uuid, epoch: usize, loss: Option<f64>) {
    match loss {
        Some(loss) => info!(event = "training.epoch", run_id = %run_id, epoch = epoch, loss = loss),
        None => info!(event = "training.epoch", run_id = %run_id, epoch = epoch),
    }
}

pub fn emit_cancel_requested(run_id: Uuid) {
    info!(event = "training.cancel_requested", run_id = %run_id);
}

/// Emit event: run reached a terminal status.
pub fn emit_training_finished(
    run_id: Uuid,
    status: RunStatus,
    epochs_completed: usize,
    diagnostic: Option<&str>,
) {
    match status {
        RunStatus::Failed => warn!(
            event = "training.finished",
            run_id = %run_id,
            status = %status,
            epochs_completed = epochs_completed,
            diagnostic = diagnostic.unwrap_or(""),
        ),
        _ => info!(
            event = "training.finished",
            run_id = %run_id,
            status = %status,
            epochs_completed = epochs_completed,
        ),
    }
}

pub fn emit_artifact_exported(path: &Path, format: &str, bytes: u64, digest: &str) {
    info!(
        event = "artifact.exported",
        path = %path.display(),
        format = %format,
        bytes = bytes,
        digest = %digest,
    );
}
