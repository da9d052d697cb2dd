//! The record model.

use crate::digest::Digest;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// Field holding a record's identifying filename.
pub const FILENAME_FIELD: &str = "filename";

/// The only field of a tombstone.
pub const TOMBSTONE_FIELD: &str = "tombstone";

/// Field a client adds to an authoritative record that replaced one of its
/// own speculative writes; the value is the placeholder local version.
pub const LOCAL_ID_FIELD: &str = "localid";

/// An ordered list of `name: value` text fields.
///
/// Field order is significant: it is preserved through both encodings and
/// feeds the digest. Duplicate names are allowed; lookups return the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the tombstone left behind by removing a record with `digest`.
    #[must_use]
    pub fn tombstone(digest: Digest) -> Self {
        Self::new().with_field(TOMBSTONE_FIELD, digest.to_string())
    }

    /// Appends a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Returns the value of the first field called `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the first field called `name`, or appends it.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Removes every field called `name`, returning the first value.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        let first = self.field(name).map(str::to_string);
        self.fields.retain(|(n, _)| n != name);
        first
    }

    /// Iterates fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the identifying filename, if the record carries one.
    pub fn filename(&self) -> Option<&str> {
        self.field(FILENAME_FIELD)
    }

    /// Returns the SHA-256 of the record's text form.
    #[must_use]
    pub fn digest(&self) -> Digest {
        Digest::of(&self.text_bytes())
    }

    /// Returns true if this record is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.tombstone_digest().is_some()
    }

    /// Returns the digest a tombstone stands for.
    pub fn tombstone_digest(&self) -> Option<Digest> {
        match self.fields.as_slice() {
            [(name, value)] if name == TOMBSTONE_FIELD => value.parse().ok(),
            _ => None,
        }
    }

    /// Checks that every field can be written in the text form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidField`] for an empty name, a name with
    /// whitespace or `:`, or a value containing a line break.
    pub fn validate(&self) -> CodecResult<()> {
        for (name, value) in &self.fields {
            validate_name(name)?;
            if value.contains(['\n', '\r']) {
                return Err(CodecError::invalid_field(format!(
                    "value of {name:?} contains a line break"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn push_unchecked(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }

    /// The text form without the blank terminator line.
    pub(crate) fn text_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

pub(crate) fn validate_name(name: &str) -> CodecResult<()> {
    if name.is_empty() {
        return Err(CodecError::invalid_field("empty field name"));
    }
    if name.chars().any(|c| c == ':' || c.is_whitespace()) {
        return Err(CodecError::invalid_field(format!(
            "field name {name:?} contains ':' or whitespace"
        )));
    }
    Ok(())
}
