//! Text form of records.
//!
//! ```text
//! type: mail
//! descr: hi
//!
//! ```
//!
//! One `name: value` pair per line, closed by an empty line. The reader is
//! line driven so a network connection can feed it as lines arrive.

use crate::error::{CodecError, CodecResult};
use crate::record::{validate_name, Record};

/// Size limits applied while reading a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLimits {
    /// Maximum number of fields.
    pub max_fields: usize,
    /// Maximum size of the text form in bytes.
    pub max_record_bytes: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_fields: 256,
            max_record_bytes: 1024 * 1024,
        }
    }
}

impl RecordLimits {
    /// Sets the maximum number of fields.
    #[must_use]
    pub const fn max_fields(mut self, value: usize) -> Self {
        self.max_fields = value;
        self
    }

    /// Sets the maximum text size in bytes.
    #[must_use]
    pub const fn max_record_bytes(mut self, value: usize) -> Self {
        self.max_record_bytes = value;
        self
    }
}

/// Encodes a record in text form, including the blank terminator line.
///
/// # Errors
///
/// Returns [`CodecError::InvalidField`] if a field cannot be written.
pub fn encode_text(record: &Record) -> CodecResult<String> {
    record.validate()?;
    let mut out = String::with_capacity(64);
    for (name, value) in record.fields() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    Ok(out)
}

/// Decodes one complete record from text.
///
/// # Errors
///
/// Returns an error for malformed lines, text after the terminator, or a
/// missing terminator.
pub fn decode_text(text: &str) -> CodecResult<Record> {
    let mut reader = RecordReader::new(RecordLimits::default());
    let mut lines = text.split_inclusive('\n');
    for line in lines.by_ref() {
        if let Some(record) = reader.push_line(line)? {
            if lines.next().is_some() {
                return Err(CodecError::MalformedLine {
                    line: "trailing data after record terminator".into(),
                });
            }
            return Ok(record);
        }
    }
    Err(CodecError::Unterminated)
}

/// Incremental, line-at-a-time record reader.
///
/// After a limit violation the reader keeps swallowing lines until the
/// blank terminator so the stream stays aligned on the next message.
#[derive(Debug)]
pub struct RecordReader {
    limits: RecordLimits,
    record: Record,
    bytes: usize,
    discarding: bool,
}

impl RecordReader {
    /// Creates a reader enforcing `limits`.
    #[must_use]
    pub fn new(limits: RecordLimits) -> Self {
        Self {
            limits,
            record: Record::new(),
            bytes: 0,
            discarding: false,
        }
    }

    /// Returns true while the reader is skipping an oversized record.
    #[must_use]
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Feeds one line (with or without its trailing newline).
    ///
    /// Returns `Ok(Some(record))` at the terminator line, `Ok(None)` while
    /// more lines are needed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ResourceExhausted`] once when a limit is
    /// exceeded and [`CodecError::MalformedLine`] for a line without `:`.
    /// A malformed line resets the reader.
    pub fn push_line(&mut self, line: &str) -> CodecResult<Option<Record>> {
        let line = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);

        if line.is_empty() {
            let discarded = std::mem::replace(&mut self.discarding, false);
            let record = std::mem::take(&mut self.record);
            self.bytes = 0;
            return Ok(if discarded { None } else { Some(record) });
        }

        if self.discarding {
            return Ok(None);
        }

        self.bytes += line.len() + 1;
        if self.bytes > self.limits.max_record_bytes {
            return Err(self.start_discarding(format!(
                "record exceeds {} bytes",
                self.limits.max_record_bytes
            )));
        }
        if self.record.len() >= self.limits.max_fields {
            return Err(self.start_discarding(format!(
                "record exceeds {} fields",
                self.limits.max_fields
            )));
        }

        let Some((name, value)) = line.split_once(':') else {
            self.reset();
            return Err(CodecError::MalformedLine {
                line: line.to_string(),
            });
        };
        if let Err(e) = validate_name(name) {
            self.reset();
            return Err(e);
        }
        let value = value.strip_prefix(' ').unwrap_or(value);
        self.record
            .push_unchecked(name.to_string(), value.to_string());
        Ok(None)
    }

    fn start_discarding(&mut self, message: String) -> CodecError {
        self.discarding = true;
        self.record = Record::new();
        CodecError::resource_exhausted(message)
    }

    fn reset(&mut self) {
        self.record = Record::new();
        self.bytes = 0;
        self.discarding = false;
    }
}
