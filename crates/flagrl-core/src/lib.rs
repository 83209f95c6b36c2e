//! Core data model for flag-selection reinforcement learning.
//!
//! Everything here is pure data: no processes, no files. The environment
//! and learning crates build on these types.
//!
//! # Modules
//!
//! - [`id`] -- `ActionId` newtype
//! - [`encoding`] -- `VariantKey` and its fixed-width base-36 encoding
//! - [`state`] -- `StateVector` feature vectors
//! - [`transition`] -- `Transition` and `Episode`
//! - [`reward`] -- log-ratio reward and speedup
//! - [`error`] -- `CoreError`

pub mod encoding;
pub mod error;
pub mod id;
pub mod reward;
pub mod state;
pub mod transition;

// Re-export commonly used types
pub use encoding::{VariantKey, CODE_WIDTH, MAX_ACTIONS};
pub use error::CoreError;
pub use id::ActionId;
pub use reward::{speedup, speedup_reward};
pub use state::StateVector;
pub use transition::{Episode, Transition};
