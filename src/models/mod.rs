//! Data models for kafka-persist
//!
//! This module contains the records read from Kafka, the messages written to
//! the store, partition assignments, and the decoding step between them.

pub mod decode;
pub mod error;
pub mod message;
pub mod partition;

// Re-export commonly used types
pub use decode::{decode_record, parse_wire_message};
pub use error::{DecodeError, DecodeResult, ValidationError, ValidationErrorKind};
pub use message::{DomainMessage, MessageStatus, RawRecord, WireMessage, MAX_CONTENT_LEN};
pub use partition::{OffsetPolicy, PartitionAssignment};
