//! End-to-end workflow tests for the session state machine.

use std::time::Duration;

use mlui_core::fakes::ScriptedBackend;
use mlui_core::{
    Activation, CompileConfig, Dataset, DenseBackend, Intent, LossKind, ModelSpec, OptimizerConfig,
    Outcome, RunStatus, Session, SessionConfig, SessionError, Stage, StageRequirement,
    TrainingConfig, TrainingEvent,
};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Sixteen rows of `y = a + b - c`.
fn linear_dataset() -> Dataset {
    let rows: Vec<Vec<f64>> = (0..16)
        .map(|i| {
            let a = (i % 4) as f64 * 0.25;
            let b = (i / 4) as f64 * 0.25;
            let c = ((i * 7) % 5) as f64 * 0.2;
            vec![a, b, c, a + b - c]
        })
        .collect();
    Dataset::from_rows(&["a", "b", "c", "y"], &rows)
}

fn linear_spec() -> ModelSpec {
    ModelSpec::builder("linear")
        .input(3)
        .dense(4, Activation::Relu)
        .dense(1, Activation::Linear)
        .build()
        .unwrap()
}

fn compiled<B: mlui_core::Backend>(session: &mut Session<B>) {
    session.load_dataset(linear_dataset()).unwrap();
    session
        .set_partition(names(&["a", "b", "c"]), names(&["y"]))
        .unwrap();
    session.define_model(linear_spec()).unwrap();
    session
        .compile_model(CompileConfig::new(OptimizerConfig::adam(0.01), LossKind::Mse))
        .unwrap();
}

fn slow_session(delay_ms: u64) -> Session<ScriptedBackend> {
    Session::new(
        ScriptedBackend::new().with_epoch_delay(Duration::from_millis(delay_ms)),
        SessionConfig::default(),
    )
}

// ── Happy path ──

#[tokio::test]
async fn dense_workflow_trains_evaluates_and_predicts() {
    let mut session = Session::new(DenseBackend::default(), SessionConfig::default());
    compiled(&mut session);
    assert_eq!(session.stage(), Stage::ModelCompiled);

    let handle = session
        .start_training(TrainingConfig::default().epochs(3).batch_size(4))
        .unwrap();
    assert_eq!(session.stage(), Stage::Training);
    assert_eq!(session.committed_stage(), Stage::ModelCompiled);

    assert_eq!(handle.wait().await, RunStatus::Completed);
    let record = handle.record();
    assert_eq!(record.history.len(), 3);
    assert!(record.history.iter().all(|m| m["loss"].is_finite()));

    session.accept_trained_model().unwrap();
    assert_eq!(session.stage(), Stage::Trained);
    let trained = session.trained_model().unwrap();
    assert_eq!(trained.metadata().epochs_completed, 3);
    assert_eq!(trained.metadata().run_id, record.run_id);
    assert!(session.training_run().is_none());

    let report = session.evaluate().unwrap();
    assert!(report.loss().is_finite());
    assert_eq!(report.rows, 16);
    assert_eq!(session.stage(), Stage::Evaluated);

    let inputs = Dataset::from_rows(&["a", "b", "c"], &[vec![0.5, 0.5, 0.0]]);
    let predicted = session.predict(&inputs).unwrap();
    assert_eq!(predicted.column_names(), vec!["y"]);
    assert_eq!(predicted.n_rows(), 1);
    assert!(session.check_invariants().is_ok());
}

#[tokio::test]
async fn dispatch_drives_the_same_workflow() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    let intents = vec![
        Intent::LoadDataset {
            dataset: linear_dataset(),
        },
        Intent::SetPartition {
            features: names(&["a", "b", "c"]),
            targets: names(&["y"]),
        },
        Intent::DefineModel {
            spec: linear_spec(),
        },
        Intent::CompileModel {
            config: CompileConfig::default(),
        },
    ];
    for intent in intents {
        assert!(matches!(session.dispatch(intent).unwrap(), Outcome::Applied));
    }

    let Outcome::TrainingStarted(handle) = session
        .dispatch(Intent::StartTraining {
            config: TrainingConfig::default().epochs(2),
        })
        .unwrap()
    else {
        panic!("expected a training handle");
    };
    assert_eq!(handle.wait().await, RunStatus::Completed);
    session.dispatch(Intent::AcceptTrainedModel).unwrap();

    let Outcome::Evaluated(report) = session.dispatch(Intent::Evaluate).unwrap() else {
        panic!("expected an evaluation report");
    };
    assert_eq!(report.loss(), 0.5);
    assert_eq!(session.snapshot().evaluation, Some(report.metrics));
}

// ── Invalidation ──

#[tokio::test]
async fn loading_a_dataset_after_training_resets_everything() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let handle = session
        .start_training(TrainingConfig::default().epochs(2))
        .unwrap();
    handle.wait().await;
    session.accept_trained_model().unwrap();
    session.evaluate().unwrap();

    session.load_dataset(linear_dataset()).unwrap();
    assert_eq!(session.stage(), Stage::DataLoaded);
    let snapshot = session.snapshot();
    assert!(snapshot.artifacts.dataset);
    assert!(!snapshot.artifacts.partition);
    assert!(!snapshot.artifacts.model_spec);
    assert!(!snapshot.artifacts.compiled_model);
    assert!(!snapshot.artifacts.trained_model);
    assert!(!snapshot.artifacts.evaluation);
    assert!(session.check_invariants().is_ok());
}

#[tokio::test]
async fn overlapping_partition_is_rejected_without_change() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let err = session
        .set_partition(names(&["a", "y"]), names(&["y"]))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidPartition(_)));
    assert_eq!(session.stage(), Stage::ModelCompiled);
    assert!(session.compiled_model().is_some());
}

#[tokio::test]
async fn unknown_partition_column_is_rejected() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    session.load_dataset(linear_dataset()).unwrap();
    let err = session
        .set_partition(names(&["a", "z"]), names(&["y"]))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidPartition(_)));
    assert_eq!(session.stage(), Stage::DataLoaded);
}

// ── Concurrency and cancellation ──

#[tokio::test]
async fn second_run_is_rejected_while_first_is_running() {
    let mut session = slow_session(50);
    compiled(&mut session);
    let first = session
        .start_training(TrainingConfig::default().epochs(100))
        .unwrap();

    let err = session
        .start_training(TrainingConfig::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::ConcurrentTraining { run_id } if run_id == first.run_id()));

    let err = session.define_model(linear_spec()).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Stage {
            requirement: StageRequirement::NoRunningTraining,
            ..
        }
    ));

    assert!(session.cancel_training().unwrap());
    assert_eq!(first.wait().await, RunStatus::Cancelled);
}

#[tokio::test]
async fn cancel_mid_run_keeps_partial_history() {
    let mut session = slow_session(30);
    compiled(&mut session);
    let handle = session
        .start_training(TrainingConfig::default().epochs(100))
        .unwrap();
    let mut events = handle.subscribe();

    loop {
        if let TrainingEvent::Epoch { epoch, .. } = events.recv().await.unwrap() {
            if epoch >= 2 {
                break;
            }
        }
    }
    assert!(session.cancel_training().unwrap());
    assert_eq!(handle.wait().await, RunStatus::Cancelled);
    assert!(!session.cancel_training().unwrap());

    let record = handle.record();
    assert!(record.history.len() >= 2);
    assert!(record.history.len() < 100);
    assert_eq!(session.stage(), Stage::Training);

    let err = session.accept_trained_model().unwrap_err();
    assert!(matches!(
        err,
        SessionError::RunNotCompleted {
            status: RunStatus::Cancelled,
            ..
        }
    ));

    session.discard_training_run().unwrap();
    assert_eq!(session.stage(), Stage::ModelCompiled);
    assert!(session.trained_model().is_none());
}

#[tokio::test]
async fn accept_is_rejected_while_running() {
    let mut session = slow_session(50);
    compiled(&mut session);
    let handle = session
        .start_training(TrainingConfig::default().epochs(50))
        .unwrap();
    let err = session.accept_trained_model().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Stage {
            requirement: StageRequirement::FinishedTrainingRun,
            current: Stage::Training,
            ..
        }
    ));
    handle.cancel();
    handle.wait().await;
}

#[tokio::test]
async fn loading_data_detaches_and_cancels_the_active_run() {
    let mut session = slow_session(200);
    compiled(&mut session);
    let first = session
        .start_training(TrainingConfig::default().epochs(10))
        .unwrap();

    session.load_dataset(linear_dataset()).unwrap();
    assert_eq!(session.stage(), Stage::DataLoaded);
    assert!(first.cancel_requested());

    session
        .set_partition(names(&["a", "b", "c"]), names(&["y"]))
        .unwrap();
    session.define_model(linear_spec()).unwrap();
    session.compile_model(CompileConfig::default()).unwrap();

    let err = session
        .start_training(TrainingConfig::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::ConcurrentTraining { .. }));

    assert_eq!(first.wait().await, RunStatus::Cancelled);
    let second = session
        .start_training(TrainingConfig::default().epochs(1))
        .unwrap();
    assert_eq!(second.wait().await, RunStatus::Completed);
}

#[tokio::test]
async fn retraining_keeps_the_previous_model_until_accepted() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let first = session
        .start_training(TrainingConfig::default().epochs(2))
        .unwrap();
    first.wait().await;
    session.accept_trained_model().unwrap();
    let previous = session.trained_model().unwrap().clone();

    let second = session
        .start_training(TrainingConfig::default().epochs(4))
        .unwrap();
    assert_eq!(session.stage(), Stage::Training);
    assert_eq!(session.committed_stage(), Stage::Trained);
    second.wait().await;

    // The accepted model is not used while a run is held.
    assert!(matches!(
        session.predict(&linear_dataset()),
        Err(SessionError::Stage {
            current: Stage::Training,
            ..
        })
    ));

    session.accept_trained_model().unwrap();
    let current = session.trained_model().unwrap();
    assert!(!current.same_artifact(&previous));
    assert_eq!(current.metadata().epochs_completed, 4);
}

#[tokio::test]
async fn finished_run_blocks_a_new_one_until_acknowledged() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let first = session
        .start_training(TrainingConfig::default().epochs(3))
        .unwrap();
    assert_eq!(first.wait().await, RunStatus::Completed);

    let err = session
        .start_training(TrainingConfig::default().epochs(1))
        .unwrap_err();
    assert!(matches!(err, SessionError::ConcurrentTraining { run_id } if run_id == first.run_id()));
    assert_eq!(session.training_run().unwrap().run_id(), first.run_id());
    assert_eq!(session.stage(), Stage::Training);

    session.discard_training_run().unwrap();
    let second = session
        .start_training(TrainingConfig::default().epochs(1))
        .unwrap();
    assert_ne!(second.run_id(), first.run_id());
    assert_eq!(second.wait().await, RunStatus::Completed);
}

#[tokio::test]
async fn cancelled_retrain_leaves_accepted_model_untouched() {
    let mut session = slow_session(30);
    compiled(&mut session);
    let first = session
        .start_training(TrainingConfig::default().epochs(2))
        .unwrap();
    assert_eq!(first.wait().await, RunStatus::Completed);
    session.accept_trained_model().unwrap();
    let previous = session.trained_model().unwrap().clone();

    let retrain = session
        .start_training(TrainingConfig::default().epochs(50))
        .unwrap();
    let mut events = retrain.subscribe();
    loop {
        if let TrainingEvent::Epoch { epoch, .. } = events.recv().await.unwrap() {
            if epoch >= 2 {
                break;
            }
        }
    }
    assert!(session.cancel_training().unwrap());
    assert_eq!(retrain.wait().await, RunStatus::Cancelled);
    assert!(retrain.record().history.len() < 50);

    session.discard_training_run().unwrap();
    assert_eq!(session.stage(), Stage::Trained);
    assert!(session.trained_model().unwrap().same_artifact(&previous));
    assert_eq!(session.trained_model().unwrap().metadata().epochs_completed, 2);
    assert!(session.check_invariants().is_ok());
}

#[tokio::test]
async fn failed_run_reports_diagnostic() {
    let mut session = Session::new(
        ScriptedBackend::new().failing_at_epoch(2),
        SessionConfig::default(),
    );
    compiled(&mut session);
    let handle = session
        .start_training(TrainingConfig::default().epochs(5))
        .unwrap();
    assert_eq!(handle.wait().await, RunStatus::Failed);

    let progress = session.snapshot().training.unwrap();
    assert_eq!(progress.status, RunStatus::Failed);
    assert_eq!(progress.epochs_completed, 1);
    assert!(progress
        .diagnostic
        .unwrap()
        .contains("scripted failure at epoch 2"));
}

// ── Stage errors ──

#[tokio::test]
async fn export_before_training_is_a_stage_error() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let dir = tempfile::tempdir().unwrap();
    let err = session
        .export(&dir.path().join("model.json"), "json")
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Stage {
            operation: "export",
            requirement: StageRequirement::AtLeast(Stage::Trained),
            current: Stage::ModelCompiled,
        }
    ));
    assert!(!dir.path().join("model.json").exists());
}

#[tokio::test]
async fn discard_without_run_is_a_stage_error() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    assert!(matches!(
        session.discard_training_run(),
        Err(SessionError::Stage {
            requirement: StageRequirement::FinishedTrainingRun,
            ..
        })
    ));
}

#[tokio::test]
async fn invalid_training_config_is_rejected() {
    let mut session = Session::new(ScriptedBackend::new(), SessionConfig::default());
    compiled(&mut session);
    let err = session
        .start_training(TrainingConfig::default().epochs(0))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidTrainingConfig(_)));
    assert!(session.training_run().is_none());
}
