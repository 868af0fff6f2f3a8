//! End-to-end pipeline tests over the in-memory log source and sink
//!
//! These run the real supervisor, workers and processor; only Kafka and
//! PostgreSQL are replaced.

use std::sync::Arc;
use std::time::Duration;

use kafka_persist::kafka::{
    MessageCounter, MessageProcessor, StreamEvent, Supervisor, SupervisorSettings,
};
use kafka_persist::models::{MessageStatus, OffsetPolicy};
use kafka_persist::test_utils::{
    record_event, valid_record, MockLogSource, MockSinkFactory, MockSinkFailure,
};
use tokio_util::sync::CancellationToken;

fn settings() -> SupervisorSettings {
    SupervisorSettings::new("database", OffsetPolicy::Oldest)
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn supervisor(
    source: MockLogSource,
    sinks: MockSinkFactory,
    counter: Arc<MessageCounter>,
) -> Supervisor<MockLogSource, MockSinkFactory> {
    Supervisor::new(
        source,
        sinks,
        settings(),
        MessageProcessor::default(),
        counter,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_every_partition_is_persisted_in_order() {
    let source = MockLogSource::new()
        .with_partition(0, (0..4).map(|o| valid_record(0, o)).collect())
        .with_partition(1, (0..3).map(|o| valid_record(1, o)).collect())
        .with_partition(2, (10..12).map(|o| valid_record(2, o)).collect());
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    let report = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await
        .expect("pipeline should run");

    for (partition, expected) in [(0, vec![0, 1, 2, 3]), (1, vec![0, 1, 2]), (2, vec![10, 11])] {
        let offsets: Vec<i64> = state
            .created_for(partition)
            .iter()
            .map(|m| m.source_offset)
            .collect();
        assert_eq!(offsets, expected, "partition {}", partition);
    }

    let created = state.created();
    assert_eq!(created.len(), 9);
    assert!(created.iter().all(|m| m.status == MessageStatus::Received));
    assert!(created.iter().all(|m| m.id.is_some()));
    assert_eq!(report.totals().persisted, 9);
    assert_eq!(report.messages_seen, 9);
}

#[tokio::test]
async fn test_two_partitions_three_records_each() {
    let source = MockLogSource::new()
        .with_partition(0, (0..3).map(|o| valid_record(0, o)).collect())
        .with_partition(1, (0..3).map(|o| valid_record(1, o)).collect());
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    let report = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await
        .unwrap();

    assert_eq!(state.create_calls(), 6);
    assert_eq!(state.attempted_offsets(0), vec![0, 1, 2]);
    assert_eq!(state.attempted_offsets(1), vec![0, 1, 2]);
    assert!(report.workers.iter().all(|w| w.stats.persisted == 3));
}

#[tokio::test]
async fn test_transport_error_does_not_disturb_the_next_record() {
    let source = MockLogSource::new().with_partition(
        0,
        vec![
            valid_record(0, 0),
            StreamEvent::TransportError("Local: Broker transport failure".to_string()),
            valid_record(0, 1),
        ],
    );
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    let report = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await
        .unwrap();

    assert_eq!(state.attempted_offsets(0), vec![0, 1]);
    assert_eq!(report.totals().transport_errors, 1);
    assert_eq!(report.totals().persisted, 2);
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_the_partition() {
    let source = MockLogSource::new().with_partition(
        0,
        vec![
            valid_record(0, 0),
            record_event(0, 1, "{\"content\": "),
            record_event(0, 2, "[1, 2, 3]"),
            record_event(0, 3, "{\"content\": \"\"}"),
            valid_record(0, 4),
        ],
    );
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    let report = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await
        .unwrap();

    let offsets: Vec<i64> = state.created().iter().map(|m| m.source_offset).collect();
    assert_eq!(offsets, vec![0, 4]);
    assert_eq!(state.attempted_offsets(0), vec![0, 4]);
    assert_eq!(report.totals().decode_failures, 3);
}

#[tokio::test]
async fn test_store_failure_drops_only_that_record() {
    let source = MockLogSource::new()
        .with_partition(0, (0..3).map(|o| valid_record(0, o)).collect())
        .with_partition(1, (0..2).map(|o| valid_record(1, o)).collect());
    let sinks = MockSinkFactory::new();
    let state = sinks.state();
    state.fail_at(0, 1, MockSinkFailure::Permanent);

    let report = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await
        .unwrap();

    let partition_0: Vec<i64> = state.created_for(0).iter().map(|m| m.source_offset).collect();
    assert_eq!(partition_0, vec![0, 2]);
    assert_eq!(state.created_for(1).len(), 2);
    assert_eq!(report.totals().persist_failures, 1);
}

#[tokio::test]
async fn test_replay_from_oldest_creates_duplicates() {
    let events: Vec<_> = (0..3).map(|o| valid_record(0, o)).collect();
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    for _ in 0..2 {
        let source = MockLogSource::new().with_partition(0, events.clone());
        supervisor(source, sinks.clone(), Arc::new(MessageCounter::new(0)))
            .run()
            .await
            .unwrap();
    }

    let created = state.created();
    assert_eq!(created.len(), 6);
    let ids: Vec<i64> = created.iter().filter_map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(created[0].source_offset, created[3].source_offset);
}

#[tokio::test]
async fn test_counter_is_shared_and_seeded() {
    let source = MockLogSource::new()
        .with_partition(0, (0..5).map(|o| valid_record(0, o)).collect())
        .with_partition(1, (0..5).map(|o| valid_record(1, o)).collect())
        .with_partition(2, vec![record_event(2, 0, "not json")]);
    let counter = Arc::new(MessageCounter::new(100));

    let report = supervisor(source, MockSinkFactory::new(), Arc::clone(&counter))
        .run()
        .await
        .unwrap();

    // Undecodable records are still counted as received
    assert_eq!(counter.get(), 111);
    assert_eq!(report.messages_seen, 111);
}

#[tokio::test]
async fn test_shutdown_closes_every_sink() {
    let source = MockLogSource::new()
        .with_partition(0, (0..2).map(|o| valid_record(0, o)).collect())
        .with_partition(1, (0..2).map(|o| valid_record(1, o)).collect())
        .with_partition(2, (0..2).map(|o| valid_record(2, o)).collect())
        .hold_open();
    let sinks = MockSinkFactory::new();
    let state = sinks.state();
    let shutdown = CancellationToken::new();

    let supervisor = Supervisor::new(
        source,
        sinks,
        settings(),
        MessageProcessor::default(),
        Arc::new(MessageCounter::new(0)),
        shutdown.clone(),
    );
    let handle = tokio::spawn(supervisor.run());

    state.wait_for_creates(6).await;
    shutdown.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor should stop after shutdown")
        .unwrap()
        .unwrap();

    assert_eq!(report.workers.len(), 3);
    assert_eq!(state.closed_sinks(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_startup_failure_consumes_nothing() {
    let source = MockLogSource::new()
        .with_partition(0, vec![valid_record(0, 0)])
        .with_partition(1, vec![valid_record(1, 0)])
        .fail_open_for(1);
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    let result = supervisor(source, sinks, Arc::new(MessageCounter::new(0)))
        .run()
        .await;

    assert!(result.is_err());
    assert_eq!(state.create_calls(), 0);
    assert_eq!(state.opened_sinks(), vec![0]);
    assert_eq!(state.closed_sinks(), vec![0]);
}

#[tokio::test]
async fn test_unreachable_cluster_is_fatal() {
    let result = supervisor(
        MockLogSource::unreachable(),
        MockSinkFactory::new(),
        Arc::new(MessageCounter::new(0)),
    )
    .run()
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), "kafka_error");
}

#[tokio::test]
async fn test_partition_hint_mismatch_still_consumes_everything() {
    let source = MockLogSource::new()
        .with_partition(0, vec![valid_record(0, 0)])
        .with_partition(1, vec![valid_record(1, 0)]);
    let sinks = MockSinkFactory::new();
    let state = sinks.state();

    Supervisor::new(
        source,
        sinks,
        settings().with_partition_hint(5),
        MessageProcessor::default(),
        Arc::new(MessageCounter::new(0)),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(state.created().len(), 2);
}
