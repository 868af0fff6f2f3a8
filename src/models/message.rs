//! Message data models for kafka-persist
//!
//! A record travels through three shapes: the [`RawRecord`] delivered by the
//! log source, the [`WireMessage`] parsed from its JSON value, and the
//! [`DomainMessage`] handed to the persistence sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::convert::TryFrom;
use validator::Validate;

use super::error::ValidationError;

/// Maximum accepted size of the `content` field, in bytes
pub const MAX_CONTENT_LEN: usize = 64 * 1024;

/// Processing status stored alongside every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Received,
    Failed,
}

impl MessageStatus {
    /// Convert to the string stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Received => "received",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record exactly as delivered by the log source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key rendered for log lines
    pub fn key_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Value rendered for log lines
    pub fn value_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Message as it appears on the wire
///
/// `id` and `status` are accepted for compatibility with producers that echo
/// stored rows back onto the topic, but both are overwritten: ids come from
/// the store and the status is always reset by the pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[validate(custom(function = "validate_content"))]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,

    /// Every other field of the payload
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl WireMessage {
    /// Create a new wire message (mainly for testing)
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            status: None,
            attributes: Map::new(),
        }
    }
}

/// `content` must be non-blank and at most [`MAX_CONTENT_LEN`] bytes
fn validate_content(content: &str) -> Result<(), validator::ValidationError> {
    if content.trim().is_empty() {
        return Err(validator::ValidationError::new("required"));
    }

    if content.len() > MAX_CONTENT_LEN {
        let mut error = validator::ValidationError::new("too_long");
        error.message = Some(Cow::Owned(format!("got {} bytes", content.len())));
        error.add_param(Cow::Borrowed("max"), &MAX_CONTENT_LEN);
        return Err(error);
    }

    Ok(())
}

/// Message ready for the persistence sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMessage {
    /// Identifier assigned by the store on create
    pub id: Option<i64>,

    pub content: String,

    /// Payload fields beyond `content`
    pub attributes: Map<String, Value>,

    pub status: MessageStatus,

    /// Partition the message was read from
    pub source_partition: i32,

    /// Offset the message was read from
    pub source_offset: i64,

    /// When the pipeline decoded this message
    pub received_at: DateTime<Utc>,
}

impl DomainMessage {
    /// Set the source position
    pub fn with_source(mut self, partition: i32, offset: i64) -> Self {
        self.source_partition = partition;
        self.source_offset = offset;
        self
    }

    /// Mark the message as received, ready to be persisted
    pub fn mark_received(&mut self) {
        self.status = MessageStatus::Received;
    }

    /// Mark the message as failed after the store rejected it
    pub fn mark_failed(&mut self) {
        self.status = MessageStatus::Failed;
    }

    /// Record the identifier assigned by the store
    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

/// Transform a wire message into a domain message
///
/// The result is `pending`; the decoder flips it to `received` once the
/// source position is attached.
impl TryFrom<WireMessage> for DomainMessage {
    type Error = ValidationError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        wire.validate()?;

        Ok(DomainMessage {
            id: None,
            content: wire.content,
            attributes: wire.attributes,
            status: MessageStatus::Pending,
            source_partition: 0,
            source_offset: 0,
            received_at: Utc::now(),
        })
    }
}
