//! Supervisor: discovers partitions, starts one worker per partition and
//! stops them all on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    KafkaIntegrationError, LogSource, MessageCounter, MessageProcessor, PartitionWorker,
    WorkerReport, WorkerStats,
};

use crate::config::Config;
use crate::db::{MessageSink, SinkFactory};
use crate::error::Result;
use crate::log_error;
use crate::models::{OffsetPolicy, PartitionAssignment};

/// How long interrupted workers get to close their sinks before being aborted
const FORCE_STOP_GRACE: Duration = Duration::from_secs(5);

/// Settings the supervisor needs from the configuration
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub topic: String,
    pub offset_policy: OffsetPolicy,
    /// Expected partition count, 0 when unknown
    pub partition_hint: i32,
    /// How long workers get to finish their current record after shutdown
    pub shutdown_timeout: Duration,
}

impl SupervisorSettings {
    pub fn new(topic: impl Into<String>, offset_policy: OffsetPolicy) -> Self {
        Self {
            topic: topic.into(),
            offset_policy,
            partition_hint: 0,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            topic: config.kafka.topic.clone(),
            offset_policy: config.kafka.offset_policy,
            partition_hint: config.kafka.partition_hint,
            shutdown_timeout: config.processing.shutdown_timeout(),
        }
    }

    pub fn with_partition_hint(mut self, hint: i32) -> Self {
        self.partition_hint = hint;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    /// One report per worker that terminated on its own, ordered by partition
    pub workers: Vec<WorkerReport>,
    /// Final value of the shared message counter
    pub messages_seen: u64,
}

impl SupervisorReport {
    /// Statistics summed over all workers
    pub fn totals(&self) -> WorkerStats {
        let mut totals = WorkerStats::default();
        for report in &self.workers {
            totals += report.stats;
        }
        totals
    }

    pub fn log_summary(&self) {
        let totals = self.totals();
        info!(
            workers = self.workers.len(),
            messages_seen = self.messages_seen,
            received = totals.received,
            persisted = totals.persisted,
            decode_failures = totals.decode_failures,
            persist_failures = totals.persist_failures,
            transport_errors = totals.transport_errors,
            skipped = totals.skipped,
            interrupted = totals.interrupted,
            "Consumer stopped"
        );
    }
}

/// Everything a worker needs, opened before any worker starts
struct OpenedPartition<R, S> {
    assignment: PartitionAssignment,
    stream: R,
    sink: S,
}

/// Supervisor for the per-partition workers of one topic
pub struct Supervisor<L, F> {
    source: L,
    sinks: F,
    settings: SupervisorSettings,
    processor: Arc<MessageProcessor>,
    counter: Arc<MessageCounter>,
    shutdown: CancellationToken,
}

impl<L, F> Supervisor<L, F>
where
    L: LogSource,
    F: SinkFactory,
{
    pub fn new(
        source: L,
        sinks: F,
        settings: SupervisorSettings,
        processor: MessageProcessor,
        counter: Arc<MessageCounter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            sinks,
            settings,
            processor: Arc::new(processor),
            counter,
            shutdown,
        }
    }

    /// Run until shutdown is requested or every worker has stopped
    ///
    /// Fails only during startup: when partitions cannot be listed, or when
    /// any partition stream or sink cannot be opened. Nothing is consumed in
    /// that case.
    pub async fn run(self) -> Result<SupervisorReport> {
        let topic = self.settings.topic.clone();
        info!(topic = %topic, offset_policy = %self.settings.offset_policy, "Starting consumer");

        let partitions = self.source.partitions(&topic).await?;
        if partitions.is_empty() {
            return Err(KafkaIntegrationError::NoPartitions(topic).into());
        }
        self.check_partition_hint(&partitions);

        let opened = self.open_partitions(&partitions).await?;

        let force_stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for partition in opened {
            let worker = PartitionWorker::new(
                partition.assignment,
                partition.stream,
                partition.sink,
                Arc::clone(&self.processor),
                Arc::clone(&self.counter),
                self.shutdown.child_token(),
            )
            .with_force_stop(force_stop.clone());
            tasks.spawn(worker.run());
        }
        info!(topic = %topic, workers = tasks.len(), "Partition workers started");

        let mut reports = self.supervise(tasks, &force_stop).await;
        reports.sort_by_key(|r| r.partition);

        Ok(SupervisorReport {
            workers: reports,
            messages_seen: self.counter.get(),
        })
    }

    fn check_partition_hint(&self, partitions: &[i32]) {
        let hint = self.settings.partition_hint;
        if hint > 0 && hint as usize != partitions.len() {
            warn!(
                expected = hint,
                actual = partitions.len(),
                "Partition count differs from the configured hint, consuming all discovered partitions"
            );
        }
    }

    /// Open a stream and a sink for every partition, or none at all
    async fn open_partitions(
        &self,
        partitions: &[i32],
    ) -> Result<Vec<OpenedPartition<L::Stream, F::Sink>>> {
        let mut opened = Vec::with_capacity(partitions.len());

        for &partition in partitions {
            let assignment =
                PartitionAssignment::new(&self.settings.topic, partition, self.settings.offset_policy);

            let stream = match self.source.open(&assignment).await {
                Ok(stream) => stream,
                Err(e) => {
                    log_error!(e, "Failed to start partition consumer", partition = partition);
                    Self::release(opened).await;
                    return Err(e);
                },
            };

            let sink = match self.sinks.open(partition).await {
                Ok(sink) => sink,
                Err(e) => {
                    log_error!(e, "Failed to open database connection", partition = partition);
                    Self::release(opened).await;
                    return Err(e.into());
                },
            };

            opened.push(OpenedPartition {
                assignment,
                stream,
                sink,
            });
        }

        Ok(opened)
    }

    /// Close the sinks of a partially completed startup
    async fn release(opened: Vec<OpenedPartition<L::Stream, F::Sink>>) {
        for mut partition in opened {
            if let Err(e) = partition.sink.close().await {
                warn!(
                    partition = partition.assignment.partition,
                    error = %e,
                    "Failed to close database connection"
                );
            }
        }
    }

    async fn supervise(
        &self,
        mut tasks: JoinSet<WorkerReport>,
        force_stop: &CancellationToken,
    ) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(tasks.len());

        let finished = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = collect_reports(&mut tasks, &mut reports) => true,
        };

        if finished {
            info!("All partition workers stopped");
            return reports;
        }

        info!(remaining = tasks.len(), "Shutdown requested, waiting for partition workers");
        let drain = collect_reports(&mut tasks, &mut reports);
        if tokio::time::timeout(self.settings.shutdown_timeout, drain).await.is_ok() {
            return reports;
        }

        // Interrupted workers still close their sinks and report
        warn!(
            remaining = tasks.len(),
            timeout_secs = self.settings.shutdown_timeout.as_secs(),
            "Partition workers did not stop in time, interrupting records in flight"
        );
        force_stop.cancel();

        let drain = collect_reports(&mut tasks, &mut reports);
        if tokio::time::timeout(FORCE_STOP_GRACE, drain).await.is_err() {
            warn!(remaining = tasks.len(), "Partition workers unresponsive, aborting");
            tasks.abort_all();
            collect_reports(&mut tasks, &mut reports).await;
        }

        reports
    }
}

/// Join finished workers until the set is empty. Cancel safe.
async fn collect_reports(tasks: &mut JoinSet<WorkerReport>, reports: &mut Vec<WorkerReport>) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(report) => {
                info!(
                    partition = report.partition,
                    persisted = report.stats.persisted,
                    "Partition worker stopped"
                );
                reports.push(report);
            },
            Err(e) if e.is_cancelled() => warn!("Partition worker aborted"),
            Err(e) => error!(error = %e, "Partition worker panicked"),
        }
    }
}
