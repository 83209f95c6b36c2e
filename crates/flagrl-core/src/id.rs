//! Stable action identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a transformation flag in the action catalog.
///
/// Ids are dense: a catalog of size N uses exactly `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub u16);

impl ActionId {
    /// The id as a `usize` index into score vectors.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ActionId {
    fn from(value: u16) -> Self {
        ActionId(value)
    }
}
