//! Record decoding
//!
//! Turns the value bytes of a [`RawRecord`] into a [`DomainMessage`] tagged
//! `received`. Anything that cannot be decoded is reported as a
//! [`DecodeError`] and never reaches the persistence sink.

use std::convert::TryFrom;

use super::error::{DecodeError, DecodeResult};
use super::message::{DomainMessage, RawRecord, WireMessage};

/// Parse raw bytes into a wire message
pub fn parse_wire_message(payload: &[u8]) -> DecodeResult<WireMessage> {
    let json_str = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(json_str)?)
}

/// Decode a record into a message ready to persist
pub fn decode_record(record: &RawRecord) -> DecodeResult<DomainMessage> {
    let wire = parse_wire_message(&record.value)?;
    let mut message = DomainMessage::try_from(wire)
        .map_err(DecodeError::from)?
        .with_source(record.partition, record.offset);
    message.mark_received();
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageStatus, ValidationErrorKind};

    fn record(value: &[u8]) -> RawRecord {
        RawRecord::new("database", 1, 17, b"key".to_vec(), value.to_vec())
    }

    #[test]
    fn test_decode_valid_record() {
        let message = decode_record(&record(br#"{"content":"hello","status":"pending","lang":"en"}"#))
            .unwrap();

        assert_eq!(message.content, "hello");
        assert_eq!(message.status, MessageStatus::Received);
        assert_eq!(message.source_partition, 1);
        assert_eq!(message.source_offset, 17);
        assert_eq!(message.attributes["lang"], "en");
        assert!(message.id.is_none());
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_record(&record(b"invalid json")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_non_object() {
        let err = decode_record(&record(b"[1,2,3]")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_missing_content() {
        let err = decode_record(&record(br#"{"status":"received"}"#)).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_blank_content() {
        match decode_record(&record(br#"{"content":""}"#)).unwrap_err() {
            DecodeError::Validation(e) => assert_eq!(e.kind, ValidationErrorKind::RequiredField),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_record(&record(&[0xc3, 0x28])).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(decode_record(&record(b"")).is_err());
    }
}
