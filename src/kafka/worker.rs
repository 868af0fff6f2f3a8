//! Partition worker: owns one partition from stream open to shutdown

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::{MessageProcessor, ProcessingOutcome, RecordStream, StreamEvent};
use crate::db::MessageSink;
use crate::models::{PartitionAssignment, RawRecord};
use crate::{record_span, worker_span};

/// Count of records received across all workers, for diagnostics
#[derive(Debug, Default)]
pub struct MessageCounter {
    total: AtomicU64,
}

impl MessageCounter {
    /// Create a counter seeded with `start`
    pub fn new(start: u64) -> Self {
        Self {
            total: AtomicU64::new(start),
        }
    }

    /// Count one record and return the new total
    pub fn increment(&self) -> u64 {
        self.total.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current total
    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Lifecycle of a partition worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Streaming,
    Terminated,
}

/// Per-worker processing statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Records accepted for processing
    pub received: u64,
    pub persisted: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
    pub transport_errors: u64,
    /// Records rejected for a foreign partition tag or a non-increasing offset
    pub skipped: u64,
    /// Records whose processing was cut short by a forced stop
    pub interrupted: u64,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.persisted += other.persisted;
        self.decode_failures += other.decode_failures;
        self.persist_failures += other.persist_failures;
        self.transport_errors += other.transport_errors;
        self.skipped += other.skipped;
        self.interrupted += other.interrupted;
    }
}

/// What a worker hands back to the supervisor when it terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub partition: i32,
    /// Lifecycle state the worker ended in
    pub state: WorkerState,
    pub stats: WorkerStats,
    /// Offset of the last record handed to the processor
    pub last_offset: Option<i64>,
}

/// Consumes one partition in offset order and persists every decodable record
pub struct PartitionWorker<R, S> {
    assignment: PartitionAssignment,
    stream: R,
    sink: S,
    processor: Arc<MessageProcessor>,
    counter: Arc<MessageCounter>,
    shutdown: CancellationToken,
    force_stop: CancellationToken,
    state: WorkerState,
    stats: WorkerStats,
    last_offset: Option<i64>,
}

impl<R, S> PartitionWorker<R, S>
where
    R: RecordStream,
    S: MessageSink,
{
    /// Create a worker from an already opened stream and sink
    pub fn new(
        assignment: PartitionAssignment,
        stream: R,
        sink: S,
        processor: Arc<MessageProcessor>,
        counter: Arc<MessageCounter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            assignment,
            stream,
            sink,
            processor,
            counter,
            shutdown,
            force_stop: CancellationToken::new(),
            state: WorkerState::Starting,
            stats: WorkerStats::default(),
            last_offset: None,
        }
    }

    /// Token that interrupts the record in flight
    ///
    /// `shutdown` lets the current record finish; `force_stop` drops it and
    /// goes straight to closing the sink.
    pub fn with_force_stop(mut self, force_stop: CancellationToken) -> Self {
        self.force_stop = force_stop;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Stream until cancelled or until the stream ends, then release the sink
    pub async fn run(mut self) -> WorkerReport {
        let span = worker_span!(self.assignment.topic, self.assignment.partition);

        async move {
            self.state = WorkerState::Streaming;
            info!(offset_policy = %self.assignment.offset_policy, "Partition worker streaming");

            let shutdown = self.shutdown.clone();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("Shutdown requested, stopping partition worker");
                        break;
                    }
                    event = self.stream.next_event() => event,
                };

                match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Partition stream ended");
                        break;
                    },
                }

                if self.force_stop.is_cancelled() {
                    break;
                }
            }

            self.terminate().await
        }
        .instrument(span)
        .await
    }

    async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TransportError(error) => {
                self.stats.transport_errors += 1;
                warn!(error = %error, "Consumer error");
            },
            StreamEvent::Record(record) => self.handle_record(record).await,
        }
    }

    async fn handle_record(&mut self, record: RawRecord) {
        if record.partition != self.assignment.partition {
            self.stats.skipped += 1;
            warn!(
                record_partition = record.partition,
                offset = record.offset,
                "Skipping record from a partition this worker does not own"
            );
            return;
        }

        if let Some(last) = self.last_offset {
            if record.offset <= last {
                self.stats.skipped += 1;
                warn!(
                    offset = record.offset,
                    last_offset = last,
                    "Skipping record at an already processed offset"
                );
                return;
            }
        }

        self.last_offset = Some(record.offset);
        self.stats.received += 1;
        let total = self.counter.increment();

        let span = record_span!(record.partition, record.offset);
        span.in_scope(|| {
            info!(
                partition = record.partition,
                offset = record.offset,
                key = %record.key_lossy(),
                value = %record.value_lossy(),
                total,
                "Received message"
            )
        });

        let force_stop = self.force_stop.clone();
        let processing = self
            .processor
            .process(&record, &mut self.sink, &self.shutdown)
            .instrument(span);

        let outcome = tokio::select! {
            biased;
            _ = force_stop.cancelled() => {
                warn!(offset = record.offset, "Forced stop, abandoning record in flight");
                self.stats.interrupted += 1;
                return;
            }
            outcome = processing => outcome,
        };

        match outcome {
            ProcessingOutcome::Persisted(_) => self.stats.persisted += 1,
            ProcessingOutcome::DecodeFailed(_) => self.stats.decode_failures += 1,
            ProcessingOutcome::PersistFailed(_) => self.stats.persist_failures += 1,
        }
    }

    async fn terminate(mut self) -> WorkerReport {
        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Failed to close database connection");
        }
        self.state = WorkerState::Terminated;

        debug!(stats = ?self.stats, "Partition worker terminated");
        WorkerReport {
            partition: self.assignment.partition,
            state: self.state,
            stats: self.stats,
            last_offset: self.last_offset,
        }
    }
}
