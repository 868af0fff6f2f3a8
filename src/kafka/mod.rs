//! Kafka integration module
//!
//! This module provides:
//! - The log source abstraction (partition discovery and ordered per-partition streams)
//! - The rdkafka-backed log source
//! - Decode-and-persist processing of single records
//! - One worker per partition, and the supervisor that starts and stops them

mod processor;
mod source;
mod supervisor;
mod worker;

pub use processor::{MessageProcessor, ProcessingOutcome};
pub use source::{KafkaLogSource, KafkaRecordStream};
pub use supervisor::{Supervisor, SupervisorReport, SupervisorSettings};
pub use worker::{MessageCounter, PartitionWorker, WorkerReport, WorkerState, WorkerStats};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::error::Result;
use crate::models::{PartitionAssignment, RawRecord};

/// Kafka-specific error types
#[derive(Debug, Error)]
pub enum KafkaIntegrationError {
    #[error("Kafka connection error: {0}")]
    ConnectionError(#[from] KafkaError),

    #[error("Topic '{0}' not found")]
    TopicNotFound(String),

    #[error("Topic '{0}' has no partitions")]
    NoPartitions(String),

    #[error("Failed to assign partition {partition} of '{topic}': {reason}")]
    AssignmentError {
        topic: String,
        partition: i32,
        reason: String,
    },
}

impl From<KafkaIntegrationError> for crate::error::Error {
    fn from(err: KafkaIntegrationError) -> Self {
        crate::error::Error::kafka(err.to_string())
    }
}

/// One event read from a partition stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The next record of the partition
    Record(RawRecord),
    /// A transport-level error. The stream stays usable afterwards.
    TransportError(String),
}

/// Ordered stream of events for a single partition
#[async_trait]
pub trait RecordStream: Send {
    /// Wait for the next event. `None` means the stream has ended and will
    /// never produce anything again.
    ///
    /// Implementations must be cancel safe: dropping the returned future
    /// before it completes must not lose a record.
    async fn next_event(&mut self) -> Option<StreamEvent>;
}

/// Source of partitioned, ordered records
#[async_trait]
pub trait LogSource: Send + Sync {
    type Stream: RecordStream + 'static;

    /// List the partition ids of `topic`, in ascending order
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// Open an ordered read stream for the assigned partition
    async fn open(&self, assignment: &PartitionAssignment) -> Result<Self::Stream>;
}
