//! Persistence sink abstractions for kafka-persist
//!
//! This module defines the create-only sink used by partition workers, the
//! factory that hands every worker its own sink, and the associated error
//! and retry types.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::DomainMessage;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection error
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// Sink was used after being closed
    #[error("Sink is closed")]
    Closed,

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Check if the error is retryable
    ///
    /// A lost connection is reported as `Connection`; sinks reopen it on the
    /// next call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Connection(_) | RepositoryError::Timeout(_)
        )
    }
}

/// Convert repository errors to application errors
impl From<RepositoryError> for crate::error::Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Timeout(msg) => crate::error::Error::Timeout(msg),
            _ => crate::error::Error::database(err.to_string()),
        }
    }
}

/// Create-only persistence sink
///
/// A sink is owned by exactly one partition worker for the worker's whole
/// lifetime, hence `&mut self`: there is no sharing and no pooling.
#[async_trait]
pub trait MessageSink: Send {
    /// Insert `message` as a new row and return the id assigned by the store
    async fn create(&mut self, message: &DomainMessage) -> RepositoryResult<i64>;

    /// Release the underlying connection. Further calls to `create` fail
    /// with [`RepositoryError::Closed`].
    async fn close(&mut self) -> RepositoryResult<()>;
}

/// Opens one sink per partition worker
#[async_trait]
pub trait SinkFactory: Send + Sync {
    type Sink: MessageSink + 'static;

    /// Open a dedicated sink for the worker consuming `partition`
    async fn open(&self, partition: i32) -> RepositoryResult<Self::Sink>;
}

/// Retry configuration for create calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial backoff
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the maximum backoff
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Build the exponential backoff schedule for one record
    ///
    /// Elapsed time is not bounded here; the number of attempts is.
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(self.initial_backoff_ms),
            current_interval: std::time::Duration::from_millis(self.initial_backoff_ms),
            max_interval: std::time::Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
