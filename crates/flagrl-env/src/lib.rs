//! The flag-selection environment.
//!
//! Turns "apply one transformation to a program variant" into a
//! deterministic, cached, reward-bearing state transition.
//!
//! # Modules
//!
//! - [`catalog`] -- The fixed action vocabulary, discovered once and persisted
//! - [`cache`] -- Per-program on-disk variant cache with blake3-verified entries
//! - [`program`] -- One source program and its variant lineage (`step`, `reset`)
//! - [`pool`] -- Opening every program in a source directory
//! - [`error`] -- `EnvError`, split into step failures and fatal errors

pub mod cache;
pub mod catalog;
pub mod error;
pub mod pool;
pub mod program;

pub use cache::{VariantCache, VariantPaths};
pub use catalog::ActionCatalog;
pub use error::EnvError;
pub use pool::open_programs;
pub use program::{EnvConfig, Measurement, Program, ProgramStats, Stage};
