//! Test utilities for kafka-persist
//!
//! This module provides an in-memory log source and persistence sink so the
//! supervisor and partition workers can be exercised without Kafka or
//! PostgreSQL.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::db::{MessageSink, RepositoryError, RepositoryResult, SinkFactory};
use crate::error::{Error, Result};
use crate::kafka::{LogSource, RecordStream, StreamEvent};
use crate::models::{DomainMessage, PartitionAssignment, RawRecord};

/// Topic used by the helpers below
pub const TEST_TOPIC: &str = "database";

/// A decodable JSON payload that identifies its offset
pub fn valid_payload(offset: i64) -> String {
    format!(r#"{{"content":"message {}","source":"test"}}"#, offset)
}

/// A record event with an arbitrary value
pub fn record_event(partition: i32, offset: i64, value: &str) -> StreamEvent {
    StreamEvent::Record(RawRecord::new(
        TEST_TOPIC,
        partition,
        offset,
        format!("key-{}", offset).into_bytes(),
        value.as_bytes().to_vec(),
    ))
}

/// A record event carrying [`valid_payload`]
pub fn valid_record(partition: i32, offset: i64) -> StreamEvent {
    record_event(partition, offset, &valid_payload(offset))
}

/// Stream replaying a fixed list of events
#[derive(Debug, Default)]
pub struct MockRecordStream {
    events: VecDeque<StreamEvent>,
    hold_open: bool,
}

impl MockRecordStream {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events: events.into(),
            hold_open: false,
        }
    }

    /// Keep the stream open once the events run out, like a live partition
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl RecordStream for MockRecordStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }
}

/// In-memory log source
#[derive(Debug, Clone, Default)]
pub struct MockLogSource {
    partitions: BTreeMap<i32, Vec<StreamEvent>>,
    fail_open: HashSet<i32>,
    unreachable: bool,
    hold_open: bool,
}

impl MockLogSource {
    /// Create a source with no partitions
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose partition listing always fails
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Add a partition that will replay `events`
    pub fn with_partition(mut self, partition: i32, events: Vec<StreamEvent>) -> Self {
        self.partitions.insert(partition, events);
        self
    }

    /// Make opening `partition` fail
    pub fn fail_open_for(mut self, partition: i32) -> Self {
        self.fail_open.insert(partition);
        self
    }

    /// Keep every opened stream open after its events are consumed
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    type Stream = MockRecordStream;

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        if self.unreachable {
            return Err(Error::kafka(format!(
                "Failed to fetch metadata for '{}': broker unreachable",
                topic
            )));
        }
        Ok(self.partitions.keys().copied().collect())
    }

    async fn open(&self, assignment: &PartitionAssignment) -> Result<MockRecordStream> {
        if self.fail_open.contains(&assignment.partition) {
            return Err(Error::kafka(format!(
                "Failed to open partition {}",
                assignment.partition
            )));
        }

        let events = self
            .partitions
            .get(&assignment.partition)
            .cloned()
            .unwrap_or_default();

        let stream = MockRecordStream::new(events);
        Ok(if self.hold_open { stream.hold_open() } else { stream })
    }
}

/// Failure injected into a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSinkFailure {
    /// Fails with a connection error, which the retry policy retries
    Retryable,
    /// Fails with a query error, which is never retried
    Permanent,
}

impl MockSinkFailure {
    fn to_error(self) -> RepositoryError {
        match self {
            MockSinkFailure::Retryable => {
                RepositoryError::Connection("connection reset by peer".to_string())
            },
            MockSinkFailure::Permanent => {
                RepositoryError::QueryExecution("value violates check constraint".to_string())
            },
        }
    }
}

#[derive(Debug, Default)]
struct SinkRecords {
    created: Vec<DomainMessage>,
    attempts: Vec<(i32, i64)>,
    /// Injected failures by position, with the number of failures left
    /// (`None` fails forever)
    failures: HashMap<(i32, i64), (MockSinkFailure, Option<usize>)>,
    /// Positions whose create never completes
    hangs: HashSet<(i32, i64)>,
    opened: Vec<i32>,
    closed: Vec<i32>,
    next_id: i64,
}

/// Store shared by every mock sink of one test
#[derive(Debug, Default)]
pub struct MockSinkState {
    records: Mutex<SinkRecords>,
}

impl MockSinkState {
    fn lock(&self) -> MutexGuard<'_, SinkRecords> {
        self.records.lock().expect("mock sink state poisoned")
    }

    /// Every successfully created message, in creation order
    pub fn created(&self) -> Vec<DomainMessage> {
        self.lock().created.clone()
    }

    /// Created messages that came from `partition`
    pub fn created_for(&self, partition: i32) -> Vec<DomainMessage> {
        self.lock()
            .created
            .iter()
            .filter(|m| m.source_partition == partition)
            .cloned()
            .collect()
    }

    /// Number of create calls, failed ones included
    pub fn create_calls(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Offsets of every create call for `partition`, in call order
    pub fn attempted_offsets(&self, partition: i32) -> Vec<i64> {
        self.lock()
            .attempts
            .iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, o)| *o)
            .collect()
    }

    /// Fail every create for the record at `partition`/`offset`
    pub fn fail_at(&self, partition: i32, offset: i64, failure: MockSinkFailure) {
        self.lock().failures.insert((partition, offset), (failure, None));
    }

    /// Fail the first `times` creates for the record at `partition`/`offset`
    pub fn fail_times(&self, partition: i32, offset: i64, failure: MockSinkFailure, times: usize) {
        self.lock()
            .failures
            .insert((partition, offset), (failure, Some(times)));
    }

    /// Make every create for the record at `partition`/`offset` hang
    pub fn hang_at(&self, partition: i32, offset: i64) {
        self.lock().hangs.insert((partition, offset));
    }

    /// Partitions whose sinks were opened through a factory, ascending
    pub fn opened_sinks(&self) -> Vec<i32> {
        let mut opened = self.lock().opened.clone();
        opened.sort_unstable();
        opened
    }

    /// Partitions whose sinks were closed, ascending
    pub fn closed_sinks(&self) -> Vec<i32> {
        let mut closed = self.lock().closed.clone();
        closed.sort_unstable();
        closed
    }

    /// Wait until at least `count` messages have been created
    pub async fn wait_for_creates(&self, count: usize) {
        let wait = async {
            while self.lock().created.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        if tokio::time::timeout(Duration::from_secs(10), wait).await.is_err() {
            panic!("timed out waiting for {} created messages", count);
        }
    }

    /// Wait until at least `count` create calls have been made
    pub async fn wait_for_attempts(&self, count: usize) {
        let wait = async {
            while self.create_calls() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        if tokio::time::timeout(Duration::from_secs(10), wait).await.is_err() {
            panic!("timed out waiting for {} create calls", count);
        }
    }

    async fn create(&self, message: &DomainMessage) -> RepositoryResult<i64> {
        let position = (message.source_partition, message.source_offset);
        let hangs = {
            let mut records = self.lock();
            records.attempts.push(position);
            records.hangs.contains(&position)
        };
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut records = self.lock();

        if let Some((failure, remaining)) = records.failures.get_mut(&position) {
            match remaining {
                None => return Err(failure.to_error()),
                Some(0) => {},
                Some(n) => {
                    *n -= 1;
                    return Err(failure.to_error());
                },
            }
        }

        records.next_id += 1;
        let id = records.next_id;
        let mut stored = message.clone();
        stored.set_id(id);
        records.created.push(stored);
        Ok(id)
    }
}

/// In-memory sink recording into a shared [`MockSinkState`]
#[derive(Debug)]
pub struct MockMessageSink {
    partition: i32,
    state: Arc<MockSinkState>,
    closed: bool,
}

impl MockMessageSink {
    /// A sink with its own fresh state
    pub fn standalone(partition: i32) -> Self {
        Self {
            partition,
            state: Arc::new(MockSinkState::default()),
            closed: false,
        }
    }

    pub fn state(&self) -> Arc<MockSinkState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl MessageSink for MockMessageSink {
    async fn create(&mut self, message: &DomainMessage) -> RepositoryResult<i64> {
        if self.closed {
            return Err(RepositoryError::Closed);
        }
        self.state.create(message).await
    }

    async fn close(&mut self) -> RepositoryResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().closed.push(self.partition);
        }
        Ok(())
    }
}

/// Factory handing out mock sinks that share one state
#[derive(Debug, Clone, Default)]
pub struct MockSinkFactory {
    state: Arc<MockSinkState>,
    fail_open: HashSet<i32>,
}

impl MockSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<MockSinkState> {
        Arc::clone(&self.state)
    }

    /// Make opening the sink for `partition` fail
    pub fn fail_open_for(mut self, partition: i32) -> Self {
        self.fail_open.insert(partition);
        self
    }
}

#[async_trait]
impl SinkFactory for MockSinkFactory {
    type Sink = MockMessageSink;

    async fn open(&self, partition: i32) -> RepositoryResult<MockMessageSink> {
        if self.fail_open.contains(&partition) {
            return Err(RepositoryError::Connection(format!(
                "connection refused for partition {}",
                partition
            )));
        }

        self.state.lock().opened.push(partition);
        Ok(MockMessageSink {
            partition,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}
