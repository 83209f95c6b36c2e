//! Variant identity: the ordered action sequence applied to a base program.
//!
//! A [`VariantKey`] is encoded as one fixed-width code per action, drawn
//! from the lowercase base-36 alphabet. Fixed width makes the encoding
//! injective over sequences without separators, and a lowercase-only
//! alphabet keeps file names distinct on case-insensitive filesystems.
//!
//! File names for a program `stem` are derived directly from the encoding:
//!
//! | key     | IR file              | executable        |
//! |---------|----------------------|-------------------|
//! | base    | the source itself    | `stem`            |
//! | `[1,2]` | `stem_opt_0102.ll`   | `stem_opt_0102`   |

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::ActionId;

/// Characters of one action code, in digit order.
pub const CODE_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Characters per action in an encoding.
pub const CODE_WIDTH: usize = 2;

/// Largest catalog the encoding can address (36^2).
pub const MAX_ACTIONS: usize = 36 * 36;

/// Ordered sequence of actions identifying one program variant.
///
/// The empty key is the base program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey(SmallVec<[ActionId; 16]>);

impl VariantKey {
    /// The key of the untransformed program.
    pub fn base() -> Self {
        VariantKey(SmallVec::new())
    }

    /// Build a key from an action sequence, rejecting unencodable ids.
    pub fn from_actions<I>(actions: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = ActionId>,
    {
        let mut key = VariantKey::base();
        for action in actions {
            key = key.extended(action)?;
        }
        Ok(key)
    }

    /// The applied actions, oldest first.
    pub fn actions(&self) -> &[ActionId] {
        &self.0
    }

    /// Number of applied actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the base program.
    pub fn is_base(&self) -> bool {
        self.0.is_empty()
    }

    /// A new key with `action` appended.
    pub fn extended(&self, action: ActionId) -> Result<Self, CoreError> {
        if action.index() >= MAX_ACTIONS {
            return Err(CoreError::OutOfRange {
                id: action,
                size: MAX_ACTIONS,
            });
        }
        let mut actions = self.0.clone();
        actions.push(action);
        Ok(VariantKey(actions))
    }

    /// Concatenated fixed-width codes; empty for the base program.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * CODE_WIDTH);
        for action in &self.0 {
            let id = action.index();
            out.push(CODE_ALPHABET[id / 36] as char);
            out.push(CODE_ALPHABET[id % 36] as char);
        }
        out
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(encoding: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidEncoding {
            encoding: encoding.to_string(),
            reason: reason.to_string(),
        };

        let bytes = encoding.as_bytes();
        if bytes.len() % CODE_WIDTH != 0 {
            return Err(invalid("length is not a multiple of the code width"));
        }

        let mut actions = SmallVec::new();
        for chunk in bytes.chunks(CODE_WIDTH) {
            let hi = digit_value(chunk[0]).ok_or_else(|| invalid("character outside [0-9a-z]"))?;
            let lo = digit_value(chunk[1]).ok_or_else(|| invalid("character outside [0-9a-z]"))?;
            actions.push(ActionId((hi * 36 + lo) as u16));
        }
        Ok(VariantKey(actions))
    }

    /// IR file name for this variant of program `stem`.
    ///
    /// Returns `None` for the base key: the base IR is the source file.
    pub fn ir_file_name(&self, stem: &str) -> Option<String> {
        if self.is_base() {
            None
        } else {
            Some(format!("{}_opt_{}.ll", stem, self.encode()))
        }
    }

    /// Executable file name for this variant of program `stem`.
    pub fn executable_file_name(&self, stem: &str) -> String {
        if self.is_base() {
            stem.to_string()
        } else {
            format!("{}_opt_{}", stem, self.encode())
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_base() {
            write!(f, "base")
        } else {
            write!(f, "{}", self.encode())
        }
    }
}

fn digit_value(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'a'..=b'z' => Some((c - b'a') as usize + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(ids: &[u16]) -> VariantKey {
        VariantKey::from_actions(ids.iter().map(|&i| ActionId(i))).unwrap()
    }

    #[test]
    fn base_encodes_empty() {
        assert_eq!(VariantKey::base().encode(), "");
        assert!(VariantKey::base().is_base());
        assert_eq!(VariantKey::base().to_string(), "base");
    }

    #[test]
    fn codes_are_two_base36_digits() {
        assert_eq!(key(&[0]).encode(), "00");
        assert_eq!(key(&[35]).encode(), "0z");
        assert_eq!(key(&[36]).encode(), "10");
        assert_eq!(key(&[1295]).encode(), "zz");
        assert_eq!(key(&[1, 2, 3]).encode(), "010203");
    }

    #[test]
    fn order_matters() {
        assert_ne!(key(&[1, 2]).encode(), key(&[2, 1]).encode());
    }

    #[test]
    fn rejects_ids_beyond_width() {
        let err = VariantKey::base().extended(ActionId(1296)).unwrap_err();
        assert!(matches!(err, CoreError::OutOfRange { size: MAX_ACTIONS, .. }));
    }

    #[test]
    fn decode_rejects_odd_length_and_bad_chars() {
        assert!(VariantKey::decode("012").is_err());
        assert!(VariantKey::decode("0A").is_err());
        assert!(VariantKey::decode("-1").is_err());
        assert_eq!(VariantKey::decode("").unwrap(), VariantKey::base());
    }

    #[test]
    fn file_names_follow_encoding() {
        assert_eq!(VariantKey::base().ir_file_name("prog"), None);
        assert_eq!(VariantKey::base().executable_file_name("prog"), "prog");
        assert_eq!(
            key(&[10, 11]).ir_file_name("prog").as_deref(),
            Some("prog_opt_0a0b.ll")
        );
        assert_eq!(key(&[10, 11]).executable_file_name("prog"), "prog_opt_0a0b");
    }

    #[test]
    fn extended_leaves_original_untouched() {
        let parent = key(&[4]);
        let child = parent.extended(ActionId(5)).unwrap();
        assert_eq!(parent.actions(), &[ActionId(4)]);
        assert_eq!(child.actions(), &[ActionId(4), ActionId(5)]);
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(ids in proptest::collection::vec(0u16..1296, 0..24)) {
            let k = key(&ids);
            prop_assert_eq!(VariantKey::decode(&k.encode()).unwrap(), k);
        }

        #[test]
        fn distinct_sequences_never_collide(
            a in proptest::collection::vec(0u16..1296, 1..8),
            b in proptest::collection::vec(0u16..1296, 1..8),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(key(&a).encode(), key(&b).encode());
        }
    }
}
