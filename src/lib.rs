//! kafka-persist library
//!
//! Consumes every partition of a Kafka topic with one worker per partition,
//! decodes each JSON record and inserts it into PostgreSQL. The binary wires
//! these modules together; integration tests use them directly.

pub mod config;
pub mod db;
pub mod error;
pub mod kafka;
pub mod logging;
pub mod models;
pub mod shutdown;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Cli, Config};
pub use error::{Error, Result};

pub use kafka::{
    KafkaLogSource, MessageCounter, MessageProcessor, Supervisor, SupervisorReport,
    SupervisorSettings,
};
pub use models::{DomainMessage, MessageStatus, OffsetPolicy, RawRecord, WireMessage};
