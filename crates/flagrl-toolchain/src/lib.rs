//! External toolchain integration for flag-selection training.
//!
//! Wraps the four logical operations run against a program variant
//! (compile, link, transform, measure) plus the pass-listing
//! self-description used to discover the action vocabulary.
//!
//! # Modules
//!
//! - [`config`] -- Immutable command templates and the transient-failure policy
//! - [`process`] -- Subprocess execution and captured [`ToolOutput`]
//! - [`toolchain`] -- The [`Toolchain`] trait and the process-backed implementation
//! - [`measure`] -- Parsing of the measurement harness record
//! - [`discovery`] -- Parsing of the `opt -h` pass listing
//! - [`scripted`] -- Deterministic in-process toolchain for tests and dry runs
//! - [`error`] -- Error types

pub mod config;
pub mod discovery;
pub mod error;
pub mod measure;
pub mod process;
pub mod scripted;
pub mod toolchain;

pub use config::{CommandTemplate, ToolchainConfig, TransientPolicy};
pub use discovery::{parse_pass_listing, DiscoveryConfig};
pub use error::ToolchainError;
pub use measure::{parse_measurement, MeasurementRecord, MEASUREMENT_MARKER};
pub use process::ToolOutput;
pub use scripted::ScriptedToolchain;
pub use toolchain::{ProcessToolchain, Toolchain};
