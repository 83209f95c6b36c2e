//! Core error types for flagrl-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! the failure modes of the pure data model.

use thiserror::Error;

use crate::id::ActionId;

/// Core errors produced by the flagrl-core crate.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// An action id outside `[0, size)` was used.
    #[error("action out of range: ActionId({id}) with catalog size {size}", id = id.0)]
    OutOfRange { id: ActionId, size: usize },

    /// A variant encoding could not be decoded.
    #[error("invalid variant encoding '{encoding}': {reason}")]
    InvalidEncoding { encoding: String, reason: String },

    /// The action space does not fit the fixed-width variant encoding.
    #[error("action space of {size} actions exceeds the encodable maximum of {max}")]
    ActionSpaceTooLarge { size: usize, max: usize },

    /// A reward was requested for a non-positive or non-finite cost.
    #[error("invalid execution cost: before={before}, after={after}")]
    InvalidCost { before: f64, after: f64 },
}
