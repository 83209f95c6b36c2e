//! flagrl command-line interface.
//!
//! Provides the `flagrl` binary:
//!
//! - `train` learns a flag-selection policy over a directory of `.ll`
//!   programs and saves the network next to the model directory
//! - `flags` prints the action catalog, discovering it on first use
//! - `measure` builds and measures the base of one program
//!
//! Exit codes: 0 = success, 1 = training or configuration error,
//! 3 = I/O error.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use flagrl_env::{open_programs, ActionCatalog, EnvConfig, EnvError, Program};
use flagrl_learn::{LearnError, Mlp, TrainConfig, Trainer};
use flagrl_toolchain::{DiscoveryConfig, ProcessToolchain, ToolchainConfig, ToolchainError};

/// Compiler flag selection by reinforcement learning.
#[derive(Parser)]
#[command(name = "flagrl", about = "Learn which optimizer flags speed programs up")]
struct Cli {
    /// JSON file with `train`, `env`, `toolchain` and `discovery` sections.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Persisted action catalog.
    #[arg(long, global = true, default_value = "flags.json")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Train on every `.ll` file in a directory.
    Train {
        /// Directory of source programs.
        #[arg(short, long, default_value = "src_ir")]
        src_dir: PathBuf,

        /// Root of the per-program variant caches (overrides the config).
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Where `<in>_<out>.model.json` is saved.
        #[arg(short, long, default_value = ".")]
        model_dir: PathBuf,

        /// Continue from a saved model instead of a fresh network.
        #[arg(long)]
        resume: bool,

        /// Episodes to run (overrides the config).
        #[arg(short, long)]
        episodes: Option<usize>,

        /// Random seed (overrides the config).
        #[arg(long)]
        seed: Option<u64>,

        /// Concurrent rollouts (overrides the config).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the action catalog.
    Flags,

    /// Build and measure the base variant of one program.
    Measure {
        /// Source `.ll` file.
        source: PathBuf,

        /// Root of the variant cache (overrides the config).
        #[arg(short, long)]
        work_dir: Option<PathBuf>,
    },
}

/// Contents of the `--config` file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunConfig {
    train: TrainConfig,
    env: EnvConfig,
    toolchain: ToolchainConfig,
    discovery: DiscoveryConfig,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err((code, msg)) => {
            eprintln!("Error: {}", msg);
            process::exit(code);
        }
    };

    let exit_code = match cli.command {
        Commands::Train {
            src_dir,
            work_dir,
            model_dir,
            resume,
            episodes,
            seed,
            workers,
        } => {
            let mut config = config;
            if let Some(dir) = work_dir {
                config.env.work_dir = dir;
            }
            if let Some(n) = episodes {
                config.train.max_episodes = n;
            }
            if let Some(s) = seed {
                config.train.seed = s;
            }
            if let Some(w) = workers {
                config.train.rollout_workers = w;
            }
            run_train(&config, &cli.catalog, &src_dir, &model_dir, resume)
        }
        Commands::Flags => run_flags(&config, &cli.catalog),
        Commands::Measure { source, work_dir } => {
            let mut config = config;
            if let Some(dir) = work_dir {
                config.env.work_dir = dir;
            }
            run_measure(&config, &source)
        }
    };
    process::exit(exit_code);
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, (i32, String)> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .map_err(|e| (3, format!("failed to read config '{}': {}", path.display(), e)))?;
    serde_json::from_str(&data).map_err(|e| (1, format!("invalid config '{}': {}", path.display(), e)))
}

/// Execute the train subcommand.
fn run_train(config: &RunConfig, catalog_path: &Path, src_dir: &Path, model_dir: &Path, resume: bool) -> i32 {
    if let Err(e) = config.train.validate() {
        eprintln!("Error: {}", e);
        return 1;
    }

    let toolchain = ProcessToolchain::new(config.toolchain.clone());
    let catalog = match ActionCatalog::load_or_discover(catalog_path, &toolchain, &config.discovery) {
        Ok(c) => c,
        Err(e) => return report_env_error("failed to load action catalog", &e),
    };

    let programs = match open_programs(src_dir, &toolchain, &config.env) {
        Ok(p) => p,
        Err(e) => return report_env_error("failed to open programs", &e),
    };
    let Some(state_dim) = programs.first().and_then(|p| p.state()).map(|s| s.dim()) else {
        eprintln!("Error: no usable .ll programs in '{}'", src_dir.display());
        return 1;
    };
    if state_dim == 0 {
        eprintln!("Error: the measurement record of '{}' has no state features", src_dir.display());
        return 1;
    }

    let online = if resume {
        // The configured learning rate wins over the one stored with the model.
        match Mlp::load(model_dir, state_dim, catalog.size()) {
            Ok(mut m) => {
                m.set_learning_rate(config.train.learning_rate);
                m
            }
            Err(e) => return report_learn_error(&e),
        }
    } else {
        Mlp::new(state_dim, catalog.size(), config.train.learning_rate, config.train.seed)
    };

    let mut trainer = match Trainer::new(config.train.clone(), &toolchain, &catalog, programs, online) {
        Ok(t) => t,
        Err(e) => return report_learn_error(&e),
    };
    let report = match trainer.train() {
        Ok(r) => r,
        Err(e) => return report_learn_error(&e),
    };

    match trainer.online().save(model_dir) {
        Ok(path) => tracing::info!(path = %path.display(), "saved model"),
        Err(e) => return report_learn_error(&e),
    }

    // Print the report as JSON for machine-readable output
    let json = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize report: {}\"}}", e));
    println!("{}", json);
    0
}

/// Execute the flags subcommand.
fn run_flags(config: &RunConfig, catalog_path: &Path) -> i32 {
    let toolchain = ProcessToolchain::new(config.toolchain.clone());
    match ActionCatalog::load_or_discover(catalog_path, &toolchain, &config.discovery) {
        Ok(catalog) => {
            for (id, flag) in catalog.iter() {
                println!("{:>4}  {}", id.0, flag);
            }
            0
        }
        Err(e) => report_env_error("failed to load action catalog", &e),
    }
}

/// Execute the measure subcommand.
fn run_measure(config: &RunConfig, source: &Path) -> i32 {
    let toolchain = ProcessToolchain::new(config.toolchain.clone());
    let program = match Program::open(source, &toolchain, &config.env) {
        Ok(p) => p,
        Err(e) => return report_env_error("failed to measure program", &e),
    };
    let json = serde_json::json!({
        "program": program.name(),
        "cost": program.base_cost(),
        "state": program.state().map(|s| s.values()),
    });
    println!("{}", json);
    0
}

fn report_learn_error(e: &LearnError) -> i32 {
    match e {
        LearnError::Env(env) => report_env_error("training aborted", env),
        LearnError::ModelIo { .. } => {
            eprintln!("I/O error: {}", e);
            3
        }
        _ => {
            eprintln!("Training error: {}", e);
            1
        }
    }
}

fn report_env_error(context: &str, e: &EnvError) -> i32 {
    let io = matches!(
        e,
        EnvError::Io { .. }
            | EnvError::Toolchain(ToolchainError::Io { .. })
            | EnvError::Toolchain(ToolchainError::Spawn { .. })
    );
    if io {
        eprintln!("I/O error: {}: {}", context, e);
        3
    } else {
        eprintln!("Error: {}: {}", context, e);
        1
    }
}
