//! Decode-and-persist processing for single Kafka records

use backoff::backoff::Backoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PersistFailurePolicy, ProcessingConfig};
use crate::db::{MessageSink, RepositoryResult, RetryConfig};
use crate::log_error;
use crate::models::{decode_record, DomainMessage, RawRecord};

/// What happened to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Stored under the given id
    Persisted(i64),
    /// Payload could not be decoded; nothing was written
    DecodeFailed(String),
    /// The store rejected the message and it was dropped
    PersistFailed(String),
}

/// Message processor that decodes a record and writes it through a sink
#[derive(Debug, Clone)]
pub struct MessageProcessor {
    /// What to do when a create call fails
    failure_policy: PersistFailurePolicy,

    /// Backoff settings under the retry policy
    retry_config: RetryConfig,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new(PersistFailurePolicy::Drop, RetryConfig::default())
    }
}

impl MessageProcessor {
    /// Create a new message processor
    pub fn new(failure_policy: PersistFailurePolicy, retry_config: RetryConfig) -> Self {
        Self {
            failure_policy,
            retry_config,
        }
    }

    /// Create a processor from processing configuration
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.persist_failure_policy, config.retry_config())
    }

    /// Decode `record` and persist it through `sink`
    ///
    /// Never fails: decode and persistence errors are logged and reported in
    /// the returned outcome so the caller can carry on with the next record.
    /// Pending retries are abandoned once `shutdown` is cancelled.
    pub async fn process<S>(
        &self,
        record: &RawRecord,
        sink: &mut S,
        shutdown: &CancellationToken,
    ) -> ProcessingOutcome
    where
        S: MessageSink + ?Sized,
    {
        let mut message = match decode_record(record) {
            Ok(message) => message,
            Err(e) => {
                log_error!(
                    e,
                    "Failed to decode message",
                    partition = record.partition,
                    offset = record.offset,
                );
                return ProcessingOutcome::DecodeFailed(e.to_string());
            },
        };

        match self.persist(&message, sink, shutdown).await {
            Ok(id) => {
                message.set_id(id);
                tracing::Span::current().record("message_id", id);
                info!(
                    message_id = id,
                    partition = record.partition,
                    offset = record.offset,
                    "Saved message"
                );
                ProcessingOutcome::Persisted(id)
            },
            Err(e) => {
                message.mark_failed();
                log_error!(
                    e,
                    "Failed to save message",
                    partition = record.partition,
                    offset = record.offset,
                    status = message.status,
                );
                ProcessingOutcome::PersistFailed(e.to_string())
            },
        }
    }

    /// Create the message, retrying according to the failure policy
    async fn persist<S>(
        &self,
        message: &DomainMessage,
        sink: &mut S,
        shutdown: &CancellationToken,
    ) -> RepositoryResult<i64>
    where
        S: MessageSink + ?Sized,
    {
        if self.failure_policy == PersistFailurePolicy::Drop {
            return sink.create(message).await;
        }

        // Driven by hand: backoff::future::retry cannot hold `&mut sink`
        // across attempts.
        let mut backoff = self.retry_config.backoff();
        let mut attempt = 0;

        loop {
            match sink.create(message).await {
                Ok(id) => {
                    if attempt > 0 {
                        debug!(attempt, "Create succeeded after retry");
                    }
                    return Ok(id);
                },
                Err(e) if e.is_retryable() && attempt < self.retry_config.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or_else(|| {
                        std::time::Duration::from_millis(self.retry_config.max_backoff_ms)
                    });
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Database write failed, will retry"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            warn!(attempt, "Shutdown requested, abandoning retry");
                            return Err(e);
                        }
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}
