//! End-to-end training tests against the scripted toolchain.
//!
//! Tests cover:
//! - An episode whose first step fails contributes nothing
//! - Default settings learn from a batch smaller than `batch_size`
//! - Greedy evaluation speedups and their mean
//! - Target synchronization
//! - Full runs, sequential and with parallel rollouts

use std::path::Path;

use flagrl_env::{ActionCatalog, EnvConfig, Program};
use flagrl_learn::{LearnError, Mlp, QFunction, TrainConfig, Trainer};
use flagrl_toolchain::ScriptedToolchain;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Scripted programs report two features: applied-flag count and size.
const STATE_DIM: usize = 2;

fn open(dir: &Path, tc: &ScriptedToolchain, name: &str, body: &str) -> Program {
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();
    let path = src.join(format!("{name}.ll"));
    std::fs::write(&path, body).unwrap();
    let config = EnvConfig {
        work_dir: dir.join("build"),
        base_max_age_secs: None,
    };
    Program::open(&path, tc, &config).unwrap()
}

fn small_config() -> TrainConfig {
    TrainConfig {
        seed: 11,
        max_episodes: 6,
        max_steps: 2,
        buffer_capacity: 16,
        batch_size: 4,
        learn_starts: 1,
        update_interval: 1,
        sync_interval: 2,
        eval_interval: 3,
        epsilon: 0.5,
        epsilon_floor: 0.1,
        epsilon_decay: 0.01,
        holdout_fraction: 0.0,
        rollout_workers: 1,
        ..TrainConfig::default()
    }
}

fn bits(q: &Mlp) -> Vec<u32> {
    q.parameters().iter().map(|p| p.to_bits()).collect()
}

// ---------------------------------------------------------------------------
// Episodes
// ---------------------------------------------------------------------------

#[test]
fn failing_first_step_pushes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--x", "--y", "--z"])
        .with_failing_flag("--x")
        .with_failing_flag("--y")
        .with_failing_flag("--z");
    let catalog = ActionCatalog::from_flags(["--x", "--y", "--z"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 4.0\n");

    let mut trainer = Trainer::with_split(
        small_config(),
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM, 3, 0.01, 0),
    )
    .unwrap();

    assert_eq!(trainer.run_episode().unwrap(), 0);
    assert!(trainer.buffer().is_empty());
    assert_eq!(tc.transform_calls(), 1);
    assert_eq!(trainer.episodes(), 1);
    assert_eq!(trainer.learn().unwrap(), None);
    assert!(trainer.training_programs()[0].lineage().is_base());
}

#[test]
fn successful_steps_fill_the_buffer_and_reset_the_program() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a", "--b"]).with_factor("--a", 0.5);
    let catalog = ActionCatalog::from_flags(["--a", "--b"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 4.0\n");
    let config = TrainConfig {
        learn_starts: 100,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM, 2, 0.01, 0),
    )
    .unwrap();

    assert_eq!(trainer.run_episode().unwrap(), 2);
    assert_eq!(trainer.buffer().len(), 2);
    assert!(trainer.training_programs()[0].lineage().is_base());
    assert!(trainer.policy().epsilon() < 0.5);
}

#[test]
fn mismatched_approximator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a"]);
    let catalog = ActionCatalog::from_flags(["--a"]).unwrap();

    let program = open(dir.path(), &tc, "p", "; cost 1.0\n");
    let err = Trainer::with_split(
        small_config(),
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM + 1, 1, 0.01, 0),
    )
    .err()
    .unwrap();
    assert!(matches!(err, LearnError::StateDimensionMismatch { expected: 3, actual: 2, .. }));

    let err = Trainer::with_split(
        small_config(),
        &tc,
        &catalog,
        Vec::new(),
        Vec::new(),
        Mlp::new(STATE_DIM, 1, 0.01, 0),
    )
    .err()
    .unwrap();
    assert!(matches!(err, LearnError::NoTrainingPrograms));
}

#[test]
fn zero_width_state_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a"]);
    let catalog = ActionCatalog::from_flags(["--a"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 1.0\n");

    let err = Trainer::with_split(
        small_config(),
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(0, 1, 0.01, 0),
    )
    .err()
    .unwrap();
    assert!(matches!(err, LearnError::InvalidConfig { field: "approximator", .. }));
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[test]
fn evaluation_reports_mean_held_out_speedup() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--speed"]);
    let catalog = ActionCatalog::from_flags(["--speed"]).unwrap();
    let train = open(dir.path(), &tc, "t", "; cost 5.0\n");
    let h1 = open(dir.path(), &tc, "h1", "; cost 10.0\n; factor --speed 0.5\n");
    let h2 = open(dir.path(), &tc, "h2", "; cost 12.0\n; factor --speed 0.3333333333333333\n");
    let config = TrainConfig {
        max_steps: 1,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![train],
        vec![h1, h2],
        Mlp::new(STATE_DIM, 1, 0.01, 0),
    )
    .unwrap();

    let evaluation = trainer.evaluate().unwrap();
    assert_eq!(evaluation.programs.len(), 2);
    assert_eq!(evaluation.programs[0].speedup, 2.0);
    assert!((evaluation.programs[1].speedup - 3.0).abs() < 1e-9);
    assert!((evaluation.mean_speedup - 2.5).abs() < 1e-9);
    assert!(evaluation.programs.iter().all(|p| !p.first_step_failed && p.steps == 1));
    assert!(evaluation.programs.iter().all(|p| p.flags == vec!["--speed".to_string()]));

    // Exploration and training mode are restored; held-out programs reset.
    assert_eq!(trainer.policy().epsilon(), 0.5);
    assert!(trainer.online().is_training());
    assert!(trainer.holdout_programs().iter().all(|p| p.lineage().is_base()));
}

#[test]
fn failed_first_step_counts_as_no_speedup() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--speed"]);
    let catalog = ActionCatalog::from_flags(["--speed"]).unwrap();
    let train = open(dir.path(), &tc, "t", "; cost 5.0\n");
    let good = open(dir.path(), &tc, "good", "; cost 10.0\n; factor --speed 0.5\n");
    // A zero cost makes the step an invalid-cost failure.
    let broken = open(dir.path(), &tc, "broken", "; cost 10.0\n; factor --speed 0\n");
    let config = TrainConfig {
        max_steps: 3,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![train],
        vec![good, broken],
        Mlp::new(STATE_DIM, 1, 0.01, 0),
    )
    .unwrap();

    let evaluation = trainer.evaluate().unwrap();
    let broken = &evaluation.programs[1];
    assert!(broken.first_step_failed);
    assert_eq!(broken.speedup, 1.0);
    assert_eq!(broken.steps, 0);
    assert!(broken.flags.is_empty());
    // The good program keeps improving: 10 -> 5 -> 2.5 -> 1.25.
    assert_eq!(evaluation.programs[0].speedup, 8.0);
    assert!((evaluation.mean_speedup - 4.5).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

#[test]
fn default_config_learns_from_a_partial_batch() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a", "--b"]).with_factor("--a", 0.5);
    let catalog = ActionCatalog::from_flags(["--a", "--b"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 4.0\n");
    let config = TrainConfig {
        max_steps: 5,
        holdout_fraction: 0.0,
        ..TrainConfig::default()
    };
    assert!(config.max_steps < config.batch_size);

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM, 2, 0.01, 0),
    )
    .unwrap();

    assert_eq!(trainer.run_episode().unwrap(), 5);
    assert_eq!(trainer.buffer().len(), 5);
    assert_eq!(trainer.gradient_steps(), 1);
    assert_eq!(trainer.report().losses.len(), 1);
}

#[test]
fn target_matches_online_right_after_sync() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a", "--b"]).with_factor("--a", 0.5);
    let catalog = ActionCatalog::from_flags(["--a", "--b"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 4.0\n");
    let config = TrainConfig {
        sync_interval: 100,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM, 2, 0.01, 3),
    )
    .unwrap();
    assert_eq!(bits(trainer.online()), bits(trainer.target()));

    trainer.run_episode().unwrap();
    assert_eq!(trainer.gradient_steps(), 1);
    assert!(trainer.report().losses[0].is_finite());
    assert_ne!(bits(trainer.online()), bits(trainer.target()));

    trainer.sync_target();
    assert_eq!(bits(trainer.online()), bits(trainer.target()));
}

#[test]
fn periodic_sync_keeps_target_in_lockstep() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a", "--b"]).with_factor("--a", 0.5);
    let catalog = ActionCatalog::from_flags(["--a", "--b"]).unwrap();
    let program = open(dir.path(), &tc, "p", "; cost 4.0\n");
    let config = TrainConfig {
        sync_interval: 1,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        vec![program],
        Vec::new(),
        Mlp::new(STATE_DIM, 2, 0.01, 3),
    )
    .unwrap();
    let before = bits(trainer.online());
    trainer.run_episode().unwrap();
    assert_eq!(trainer.gradient_steps(), 1);
    assert_ne!(bits(trainer.online()), before);
    assert_eq!(bits(trainer.online()), bits(trainer.target()));
}

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

fn run(workers: usize) -> flagrl_learn::TrainReport {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a", "--b", "--c"])
        .with_factor("--a", 0.5)
        .with_factor("--b", 1.5);
    let catalog = ActionCatalog::from_flags(["--a", "--b", "--c"]).unwrap();
    let train = vec![
        open(dir.path(), &tc, "t1", "; cost 4.0\n"),
        open(dir.path(), &tc, "t2", "; cost 8.0\n"),
        open(dir.path(), &tc, "t3", "; cost 2.0\n; factor --c 0.25\n"),
    ];
    let holdout = vec![open(dir.path(), &tc, "h", "; cost 6.0\n")];
    let config = TrainConfig {
        rollout_workers: workers,
        ..small_config()
    };

    let mut trainer = Trainer::with_split(
        config,
        &tc,
        &catalog,
        train,
        holdout,
        Mlp::new(STATE_DIM, 3, 0.01, 5),
    )
    .unwrap();
    let report = trainer.train().unwrap();
    assert!(trainer.buffer().len() <= trainer.buffer().capacity());
    assert!(trainer
        .training_programs()
        .iter()
        .all(|p| p.lineage().is_base()));
    report
}

#[test]
fn sequential_run_is_reproducible() {
    let first = run(1);
    assert_eq!(first.episodes, 6);
    assert_eq!(first.evaluations.len(), 2);
    assert_eq!(first.evaluations[0].episode, 3);
    assert!(first.gradient_steps > 0);
    assert_eq!(first.losses.len(), first.gradient_steps);
    assert!(first.final_epsilon < 0.5);
    assert!(first.final_epsilon >= 0.1);

    let second = run(1);
    assert_eq!(first, second);
}

#[test]
fn parallel_rollouts_complete_every_episode() {
    let report = run(3);
    assert_eq!(report.episodes, 6);
    assert_eq!(report.evaluations.len(), 2);
    assert!(report.evaluations.iter().all(|e| e.mean_speedup > 0.0));
}

#[test]
fn random_split_holds_out_a_share() {
    let dir = tempfile::tempdir().unwrap();
    let tc = ScriptedToolchain::new(&["--a"]);
    let catalog = ActionCatalog::from_flags(["--a"]).unwrap();
    let programs: Vec<Program> = (0..5)
        .map(|i| open(dir.path(), &tc, &format!("p{i}"), "; cost 1.0\n"))
        .collect();
    let config = TrainConfig {
        holdout_fraction: 0.4,
        ..small_config()
    };

    let trainer = Trainer::new(config, &tc, &catalog, programs, Mlp::new(STATE_DIM, 1, 0.01, 0)).unwrap();
    assert_eq!(trainer.holdout_programs().len(), 2);
    assert_eq!(trainer.training_programs().len(), 3);
}
