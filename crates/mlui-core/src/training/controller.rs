//! Background training: one blocking worker per run, supervised by an async
//! task that enforces the timeout and finalizes the run record.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{Backend, MetricMap};
use crate::config::SessionConfig;
use crate::data::{Dataset, Partition};
use crate::error::{Result, SessionError};
use crate::obs;
use crate::training::{RunStatus, TrainingConfig, TrainingEvent, TrainingRun};

struct RunInner<T> {
    run: TrainingRun,
    candidate: Option<Arc<T>>,
}

/// State shared between a run's handles, its worker and its supervisor.
struct RunShared<T> {
    run_id: Uuid,
    inner: Mutex<RunInner<T>>,
    cancel: AtomicBool,
    events: broadcast::Sender<TrainingEvent>,
    status: watch::Sender<RunStatus>,
}

impl<T> RunShared<T> {
    fn lock(&self) -> MutexGuard<'_, RunInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one epoch. Returns `false` once the run is no longer running.
    fn record_epoch(&self, epoch: usize, metrics: MetricMap) -> bool {
        let total_epochs = {
            let mut inner = self.lock();
            if inner.run.status != RunStatus::Running {
                return false;
            }
            inner.run.history.push(metrics.clone());
            inner.run.total_epochs
        };
        obs::emit_epoch_completed(self.run_id, epoch, metrics.get("loss").copied());
        // Lagging or absent subscribers are not an error.
        let _ = self.events.send(TrainingEvent::Epoch {
            run_id: self.run_id,
            epoch,
            total_epochs,
            metrics,
        });
        true
    }

    /// Move the run to a terminal status. The first caller wins; later calls
    /// return `false` and change nothing.
    fn finish(
        &self,
        status: RunStatus,
        diagnostic: Option<String>,
        candidate: Option<T>,
        stopped_early: bool,
    ) -> bool {
        let epochs_completed = {
            let mut inner = self.lock();
            if inner.run.status.is_terminal() {
                return false;
            }
            inner.run.status = status;
            inner.run.finished_at = Some(Utc::now());
            inner.run.diagnostic = diagnostic.clone();
            inner.run.stopped_early = stopped_early;
            inner.candidate = candidate.map(Arc::new);
            inner.run.history.len()
        };
        self.status.send_replace(status);
        obs::emit_training_finished(self.run_id, status, epochs_completed, diagnostic.as_deref());
        let _ = self.events.send(TrainingEvent::Finished {
            run_id: self.run_id,
            status,
            epochs_completed,
            diagnostic,
        });
        true
    }
}

/// Cancellable view of one training run.
pub struct TrainingHandle<B: Backend> {
    shared: Arc<RunShared<B::Trained>>,
}

impl<B: Backend> Clone for TrainingHandle<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backend> fmt::Debug for TrainingHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingHandle")
            .field("run_id", &self.run_id())
            .field("status", &self.status())
            .finish()
    }
}

impl<B: Backend> TrainingHandle<B> {
    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    pub fn status(&self) -> RunStatus {
        *self.shared.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Copy of the run record as it stands now.
    pub fn record(&self) -> TrainingRun {
        self.shared.lock().run.clone()
    }

    /// Ask the worker to stop at its next epoch boundary. Returns `false` if
    /// the run had already finished.
    pub fn cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        if !self.shared.cancel.swap(true, Ordering::SeqCst) {
            obs::emit_cancel_requested(self.shared.run_id);
        }
        true
    }

    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Progress events published after this call. Receivers that fall more
    /// than the channel capacity behind observe `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<TrainingEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.shared.status.subscribe();
        let status = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    /// Trained model produced by a completed run.
    pub(crate) fn candidate(&self) -> Option<Arc<B::Trained>> {
        self.shared.lock().candidate.clone()
    }

    pub(crate) fn same_run(&self, other: &TrainingHandle<B>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

enum WorkerOutcome<T> {
    Completed { model: T, stopped_early: bool },
    Cancelled,
    Failed(String),
}

enum StopReason {
    None,
    Cancelled,
    NonFinite(usize),
    Finalized,
    EarlyStopped,
}

fn run_worker<B: Backend>(
    backend: &B,
    shared: &RunShared<B::Trained>,
    compiled: &B::Compiled,
    dataset: &Dataset,
    partition: &Partition,
    config: &TrainingConfig,
) -> WorkerOutcome<B::Trained> {
    if shared.cancel.load(Ordering::SeqCst) {
        return WorkerOutcome::Cancelled;
    }
    let data = match partition.select(dataset) {
        Ok(data) => data,
        Err(e) => return WorkerOutcome::Failed(e.to_string()),
    };

    let mut tracker = config.early_stopping.as_ref().map(|es| es.tracker());
    let mut stop = StopReason::None;
    let result = backend.fit(compiled, &data, config, &mut |report| {
        // discard: the epoch that observes the cancellation is not recorded
        if shared.cancel.load(Ordering::SeqCst) {
            stop = StopReason::Cancelled;
            return ControlFlow::Break(());
        }
        if report.metrics.values().any(|v| !v.is_finite()) {
            stop = StopReason::NonFinite(report.epoch);
            return ControlFlow::Break(());
        }
        let stalled = tracker
            .as_mut()
            .map(|t| t.observe(&report.metrics))
            .unwrap_or(false);
        if !shared.record_epoch(report.epoch, report.metrics) {
            stop = StopReason::Finalized;
            return ControlFlow::Break(());
        }
        if stalled {
            stop = StopReason::EarlyStopped;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });

    match (result, stop) {
        (Err(e), _) => WorkerOutcome::Failed(e.to_string()),
        (Ok(_), StopReason::Cancelled | StopReason::Finalized) => WorkerOutcome::Cancelled,
        (Ok(_), StopReason::NonFinite(epoch)) => {
            WorkerOutcome::Failed(format!("non-finite metric reported at epoch {epoch}"))
        }
        (Ok(outcome), StopReason::EarlyStopped) => WorkerOutcome::Completed {
            model: outcome.model,
            stopped_early: true,
        },
        (Ok(outcome), StopReason::None) => WorkerOutcome::Completed {
            model: outcome.model,
            stopped_early: false,
        },
    }
}

async fn supervise<T: Send + Sync + 'static>(
    shared: Arc<RunShared<T>>,
    worker: JoinHandle<WorkerOutcome<T>>,
    timeout: Option<Duration>,
) {
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                // The worker stops at its next epoch boundary; its result is
                // dropped with the detached join handle.
                shared.cancel.store(true, Ordering::SeqCst);
                shared.finish(
                    RunStatus::Failed,
                    Some(format!("training timed out after {limit:?}")),
                    None,
                    false,
                );
                return;
            }
        },
        None => worker.await,
    };

    match joined {
        Ok(WorkerOutcome::Completed {
            model,
            stopped_early,
        }) => {
            shared.finish(RunStatus::Completed, None, Some(model), stopped_early);
        }
        Ok(WorkerOutcome::Cancelled) => {
            shared.finish(
                RunStatus::Cancelled,
                Some("cancelled by request".into()),
                None,
                false,
            );
        }
        Ok(WorkerOutcome::Failed(message)) => {
            shared.finish(RunStatus::Failed, Some(message), None, false);
        }
        Err(e) => {
            let message = if e.is_panic() {
                "training worker panicked"
            } else {
                "training worker was aborted"
            };
            shared.finish(RunStatus::Failed, Some(message.into()), None, false);
        }
    }
}

/// Starts training runs on the ambient tokio runtime.
pub struct TrainingController<B: Backend> {
    backend: Arc<B>,
    progress_buffer: usize,
    default_timeout: Option<Duration>,
}

impl<B: Backend> TrainingController<B> {
    pub fn new(backend: Arc<B>, config: &SessionConfig) -> Self {
        Self {
            backend,
            progress_buffer: config.progress_buffer.max(1),
            default_timeout: config.training_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Hand a new run to a blocking worker and return immediately.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Internal` when called outside a tokio runtime.
    pub fn start(
        &self,
        compiled: Arc<B::Compiled>,
        dataset: Arc<Dataset>,
        partition: Partition,
        config: TrainingConfig,
    ) -> Result<TrainingHandle<B>> {
        let runtime = Handle::try_current().map_err(|_| {
            SessionError::Internal("training requires a running tokio runtime".into())
        })?;

        let mut run = TrainingRun::new(config.epochs);
        run.status = RunStatus::Running;
        let run_id = run.run_id;

        let (events, _) = broadcast::channel(self.progress_buffer);
        let (status, _) = watch::channel(RunStatus::Running);
        let shared = Arc::new(RunShared {
            run_id,
            inner: Mutex::new(RunInner {
                run,
                candidate: None,
            }),
            cancel: AtomicBool::new(false),
            events,
            status,
        });

        obs::emit_training_started(run_id, config.epochs);

        let timeout = config.timeout.or(self.default_timeout);
        let backend = Arc::clone(&self.backend);
        let worker_shared = Arc::clone(&shared);
        let worker = runtime.spawn_blocking(move || {
            run_worker(
                backend.as_ref(),
                &worker_shared,
                &compiled,
                &dataset,
                &partition,
                &config,
            )
        });
        runtime.spawn(supervise(Arc::clone(&shared), worker, timeout));

        Ok(TrainingHandle { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedBackend;

    fn dataset() -> Arc<Dataset> {
        Arc::new(Dataset::from_rows(
            &["x", "y"],
            &[vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]],
        ))
    }

    fn partition() -> Partition {
        Partition::new(vec!["x".into()], vec!["y".into()]).unwrap()
    }

    fn controller(backend: ScriptedBackend) -> TrainingController<ScriptedBackend> {
        TrainingController::new(Arc::new(backend), &SessionConfig::default())
    }

    #[tokio::test]
    async fn test_run_completes_with_full_history() {
        let ctl = controller(ScriptedBackend::new());
        let handle = ctl
            .start(
                Arc::new(()),
                dataset(),
                partition(),
                TrainingConfig::default().epochs(4),
            )
            .unwrap();
        assert_eq!(handle.wait().await, RunStatus::Completed);
        let record = handle.record();
        assert_eq!(record.history.len(), 4);
        assert!(record.finished_at.is_some());
        assert!(handle.candidate().is_some());
        assert!(!handle.cancel());
    }

    #[tokio::test]
    async fn test_backend_error_fails_run() {
        let ctl = controller(ScriptedBackend::new().failing_at_epoch(2));
        let handle = ctl
            .start(
                Arc::new(()),
                dataset(),
                partition(),
                TrainingConfig::default().epochs(5),
            )
            .unwrap();
        assert_eq!(handle.wait().await, RunStatus::Failed);
        let record = handle.record();
        assert_eq!(record.history.len(), 1);
        assert!(record.diagnostic.unwrap().contains("epoch 2"));
        assert!(handle.candidate().is_none());
    }

    #[tokio::test]
    async fn test_worker_panic_fails_run() {
        let ctl = controller(ScriptedBackend::new().panicking_at_epoch(1));
        let handle = ctl
            .start(
                Arc::new(()),
                dataset(),
                partition(),
                TrainingConfig::default().epochs(3),
            )
            .unwrap();
        assert_eq!(handle.wait().await, RunStatus::Failed);
        assert!(handle.record().diagnostic.unwrap().contains("panicked"));
    }

    #[test]
    fn test_start_outside_runtime_is_internal_error() {
        let ctl = controller(ScriptedBackend::new());
        let err = ctl
            .start(Arc::new(()), dataset(), partition(), TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::Internal(_)));
    }
}
