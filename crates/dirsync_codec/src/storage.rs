//! Storage form of records: CBOR through `serde`.

use crate::error::{CodecError, CodecResult};
use crate::record::Record;

/// Encodes a record for a journal log.
///
/// # Errors
///
/// Returns [`CodecError::Storage`] if serialization fails.
pub fn to_storage_bytes(record: &Record) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    ciborium::into_writer(record, &mut out).map_err(|e| CodecError::storage(e.to_string()))?;
    Ok(out)
}

/// Decodes a record read back from a journal log.
///
/// # Errors
///
/// Returns [`CodecError::Storage`] if the bytes are not a valid record.
pub fn from_storage_bytes(bytes: &[u8]) -> CodecResult<Record> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_form_is_lossless() {
        let record = Record::new()
            .with_field("type", "contact")
            .with_field("name", "Ada: Countess of Lovelace")
            .with_field("name", "duplicate names survive");

        let bytes = to_storage_bytes(&record).unwrap();
        assert_eq!(from_storage_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn garbage_is_rejected() {
        let result = from_storage_bytes(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::Storage { .. })));
    }
}
