//! Integration tests against a running Kafka broker

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use kafka_persist::config::KafkaConfig;
use kafka_persist::kafka::{
    KafkaLogSource, LogSource, MessageCounter, MessageProcessor, Supervisor, SupervisorSettings,
};
use kafka_persist::models::OffsetPolicy;
use kafka_persist::test_utils::{valid_payload, MockSinkFactory};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;

/// Test Kafka broker address
const TEST_KAFKA_BROKER: &str = "localhost:9092";

fn unique_topic(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().timestamp_millis())
}

fn kafka_config(topic: &str) -> KafkaConfig {
    KafkaConfig {
        brokers: TEST_KAFKA_BROKER.to_string(),
        topic: topic.to_string(),
        consumer_group: "kafka-persist-test".to_string(),
        session_timeout_ms: 6000,
        ..KafkaConfig::default()
    }
}

/// Create a topic with the given number of partitions
async fn create_topic(topic: &str, partitions: i32) -> Result<(), Box<dyn std::error::Error>> {
    let admin: AdminClient<DefaultClientContext> =
        ClientConfig::new().set("bootstrap.servers", TEST_KAFKA_BROKER).create()?;

    let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
    let results = admin.create_topics(&[new_topic], &AdminOptions::new()).await?;

    for result in results {
        if let Err((topic, err)) = result {
            if !err.to_string().contains("already exists") {
                return Err(format!("Failed to create topic {}: {}", topic, err).into());
            }
        }
    }

    Ok(())
}

/// Produce `count` decodable messages to each partition
async fn produce(topic: &str, partitions: i32, count: i64) -> Result<(), Box<dyn std::error::Error>> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", TEST_KAFKA_BROKER)
        .set("message.timeout.ms", "5000")
        .create()?;

    let mut sends = Vec::new();
    for partition in 0..partitions {
        for offset in 0..count {
            let producer = producer.clone();
            let topic = topic.to_string();
            sends.push(async move {
                let payload = valid_payload(offset);
                let key = format!("key-{}", offset);
                let record = FutureRecord::to(&topic)
                    .partition(partition)
                    .payload(&payload)
                    .key(&key);
                producer
                    .send(record, Timeout::After(Duration::from_secs(5)))
                    .await
                    .map_err(|(err, _)| err)
            });
        }
    }

    try_join_all(sends).await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Kafka to be running
async fn test_partitions_are_discovered() {
    let topic = unique_topic("kafka-persist-discovery");
    create_topic(&topic, 3).await.expect("Failed to create topic");

    let source = KafkaLogSource::new(kafka_config(&topic));
    let partitions = source.partitions(&topic).await.expect("Failed to list partitions");

    assert_eq!(partitions, vec![0, 1, 2]);
}

#[tokio::test]
#[ignore] // Requires Kafka to be running
async fn test_missing_topic_is_an_error() {
    let topic = unique_topic("kafka-persist-missing");
    let source = KafkaLogSource::new(KafkaConfig {
        metadata_timeout_ms: 3000,
        ..kafka_config(&topic)
    });

    assert!(source.partitions(&topic).await.is_err());
}

#[tokio::test]
#[ignore] // Requires Kafka to be running
async fn test_supervisor_consumes_all_partitions_from_oldest() {
    let topic = unique_topic("kafka-persist-pipeline");
    create_topic(&topic, 3).await.expect("Failed to create topic");
    produce(&topic, 3, 5).await.expect("Failed to produce messages");

    let sinks = MockSinkFactory::new();
    let state = sinks.state();
    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(
        KafkaLogSource::new(kafka_config(&topic)),
        sinks,
        SupervisorSettings::new(&topic, OffsetPolicy::Oldest).with_partition_hint(3),
        MessageProcessor::default(),
        Arc::new(MessageCounter::new(0)),
        shutdown.clone(),
    );

    let handle = tokio::spawn(supervisor.run());
    state.wait_for_creates(15).await;
    shutdown.cancel();

    let report = handle.await.unwrap().expect("Supervisor failed");
    assert_eq!(report.workers.len(), 3);

    for partition in 0..3 {
        let offsets: Vec<i64> = state
            .created_for(partition)
            .iter()
            .map(|m| m.source_offset)
            .collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4], "partition {}", partition);
    }
    assert_eq!(state.closed_sinks(), vec![0, 1, 2]);
}
