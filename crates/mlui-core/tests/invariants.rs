//! Random operation sequences must never break the slot/stage invariants,
//! and a rejected operation must never change what the session holds.

use std::path::Path;
use std::time::Duration;

use mlui_core::fakes::ScriptedBackend;
use mlui_core::{
    Activation, CompileConfig, Dataset, ModelSpec, Session, SessionConfig, TrainingConfig,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

fn dataset(with_extra: bool) -> Dataset {
    let rows: Vec<Vec<f64>> = (0..6)
        .map(|i| {
            let x = i as f64;
            if with_extra {
                vec![x, x * 0.5, 1.0 - x]
            } else {
                vec![x, 1.0 - x]
            }
        })
        .collect();
    if with_extra {
        Dataset::from_rows(&["x", "w", "y"], &rows)
    } else {
        Dataset::from_rows(&["x", "y"], &rows)
    }
}

fn spec(inputs: usize) -> ModelSpec {
    ModelSpec::builder("random")
        .input(inputs)
        .dense(3, Activation::Relu)
        .dense(1, Activation::Linear)
        .build()
        .unwrap()
}

async fn apply(
    session: &mut Session<ScriptedBackend>,
    op: u32,
    rng: &mut Xoshiro256PlusPlus,
    dir: &Path,
) -> bool {
    match op {
        0 => session.load_dataset(dataset(rng.gen_bool(0.5))).is_ok(),
        1 => session
            .set_partition(vec!["x".into()], vec!["y".into()])
            .is_ok(),
        2 => session
            .set_partition(vec!["x".into(), "w".into()], vec!["y".into()])
            .is_ok(),
        3 => session.set_partition(vec!["x".into()], vec!["x".into()]).is_ok(),
        4 => session.define_model(spec(rng.gen_range(1..=2))).is_ok(),
        5 => session.compile_model(CompileConfig::default()).is_ok(),
        6 => session
            .start_training(TrainingConfig::default().epochs(rng.gen_range(1..=3)))
            .is_ok(),
        7 => session.cancel_training().is_ok(),
        8 => {
            if let Some(run) = session.training_run() {
                run.wait().await;
            }
            session.accept_trained_model().is_ok()
        }
        9 => session.discard_training_run().is_ok(),
        10 => session.evaluate().is_ok(),
        11 => session.predict(&dataset(true)).is_ok(),
        12 => session.export(&dir.join("model.json"), "json").is_ok(),
        _ => session.load_dataset(Dataset::default()).is_ok(),
    }
}

#[tokio::test]
async fn random_sequences_preserve_invariants() {
    for seed in 0..24u64 {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            ScriptedBackend::new().with_epoch_delay(Duration::from_millis(1)),
            SessionConfig::default(),
        );
        for step in 0..60 {
            let op = rng.gen_range(0..14);
            let before = session.snapshot();
            let ok = apply(&mut session, op, &mut rng, dir.path()).await;
            if let Err(e) = session.check_invariants() {
                panic!("seed {seed} step {step} op {op}: {e}");
            }
            if !ok {
                let after = session.snapshot();
                assert_eq!(
                    (before.stage, before.committed_stage, before.artifacts),
                    (after.stage, after.committed_stage, after.artifacts),
                    "seed {seed} step {step}: rejected op {op} changed the session"
                );
            }
        }
        if let Some(run) = session.training_run() {
            run.cancel();
            run.wait().await;
        }
    }
}
