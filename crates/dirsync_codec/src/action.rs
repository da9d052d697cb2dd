//! Patch actions.

use crate::error::{CodecError, CodecResult};
use std::fmt;

/// The kind of mutation a patch commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A full record was added.
    Add,
    /// A record was removed; the patch carries a tombstone.
    Remove,
}

impl Action {
    /// Returns the wire character (`+` or `-`).
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Action::Add => '+',
            Action::Remove => '-',
        }
    }

    /// Parses a wire character.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidAction`] for anything but `+` or `-`.
    pub fn from_char(c: char) -> CodecResult<Self> {
        match c {
            '+' => Ok(Action::Add),
            '-' => Ok(Action::Remove),
            other => Err(CodecError::InvalidAction(other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_characters() {
        assert_eq!(Action::from_char('+').unwrap(), Action::Add);
        assert_eq!(Action::from_char('-').unwrap(), Action::Remove);
        assert_eq!(Action::Remove.to_string(), "-");
        assert!(matches!(
            Action::from_char('x'),
            Err(CodecError::InvalidAction('x'))
        ));
    }
}
