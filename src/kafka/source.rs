//! rdkafka-backed log source
//!
//! Partitions are assigned explicitly, one consumer per partition, so no
//! consumer-group rebalancing ever moves a partition between workers and no
//! offsets are committed.

use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use tracing::{debug, info};

use super::{KafkaIntegrationError, LogSource, RecordStream, StreamEvent};
use crate::config::KafkaConfig;
use crate::error::{Error, Result};
use crate::models::{OffsetPolicy, PartitionAssignment, RawRecord};

/// Map the start policy onto an rdkafka logical offset
fn start_offset(policy: OffsetPolicy) -> Offset {
    match policy {
        OffsetPolicy::Oldest => Offset::Beginning,
        OffsetPolicy::Newest => Offset::End,
    }
}

/// Log source reading from a Kafka cluster
#[derive(Debug, Clone)]
pub struct KafkaLogSource {
    config: KafkaConfig,
}

impl KafkaLogSource {
    /// Create a new log source
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Fetch partition ids with a short-lived metadata client
    fn fetch_partitions(config: &KafkaConfig, topic: &str) -> Result<Vec<i32>> {
        let client: BaseConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka metadata client: {}", e))?;

        let metadata = client
            .fetch_metadata(Some(topic), config.metadata_timeout())
            .map_err(KafkaIntegrationError::from)?;

        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or_else(|| KafkaIntegrationError::TopicNotFound(topic.to_string()))?;

        if let Some(err) = topic_metadata.error() {
            debug!(topic, error = ?err, "Topic metadata returned an error");
            return Err(KafkaIntegrationError::TopicNotFound(topic.to_string()).into());
        }

        let mut partitions: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();
        partitions.sort_unstable();

        if partitions.is_empty() {
            return Err(KafkaIntegrationError::NoPartitions(topic.to_string()).into());
        }

        Ok(partitions)
    }
}

#[async_trait]
impl LogSource for KafkaLogSource {
    type Stream = KafkaRecordStream;

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let config = self.config.clone();
        let topic = topic.to_string();

        // Metadata requests block the calling thread
        tokio::task::spawn_blocking(move || Self::fetch_partitions(&config, &topic))
            .await
            .map_err(|e| Error::internal(format!("Metadata task failed: {}", e)))?
    }

    async fn open(&self, assignment: &PartitionAssignment) -> Result<KafkaRecordStream> {
        let consumer: StreamConsumer = self
            .config
            .build_consumer_config()
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka consumer: {}", e))?;

        let mut partitions = TopicPartitionList::new();
        partitions
            .add_partition_offset(
                &assignment.topic,
                assignment.partition,
                start_offset(assignment.offset_policy),
            )
            .map_err(|e| KafkaIntegrationError::AssignmentError {
                topic: assignment.topic.clone(),
                partition: assignment.partition,
                reason: e.to_string(),
            })?;

        consumer
            .assign(&partitions)
            .map_err(|e| KafkaIntegrationError::AssignmentError {
                topic: assignment.topic.clone(),
                partition: assignment.partition,
                reason: e.to_string(),
            })?;

        info!(
            topic = %assignment.topic,
            partition = assignment.partition,
            offset_policy = %assignment.offset_policy,
            "Partition stream opened"
        );

        Ok(KafkaRecordStream {
            consumer,
            partition: assignment.partition,
        })
    }
}

/// Stream over a single assigned partition
pub struct KafkaRecordStream {
    consumer: StreamConsumer,
    partition: i32,
}

impl KafkaRecordStream {
    /// Partition this stream is assigned to
    pub fn partition(&self) -> i32 {
        self.partition
    }
}

#[async_trait]
impl RecordStream for KafkaRecordStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = match self.consumer.recv().await {
            Ok(message) => StreamEvent::Record(RawRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
                value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(e) => StreamEvent::TransportError(e.to_string()),
        };

        // A Kafka partition never ends on its own
        Some(event)
    }
}
