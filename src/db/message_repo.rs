//! PostgreSQL message sink for kafka-persist
//!
//! Messages are inserted into the `messages` table and never updated.
//! Replaying a partition therefore creates duplicate rows; the source
//! partition and offset are stored so duplicates can be identified.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::types::Json;
use sqlx::Connection;
use std::time::Duration;

use crate::{
    config::DatabaseConfig,
    db::{
        connection,
        repository::{MessageSink, RepositoryError, RepositoryResult, SinkFactory},
    },
    error::{Error, Result},
    logging::Timer,
    models::DomainMessage,
};

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (
        content, attributes, status, src_partition, src_offset, received_at
    ) VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING id
"#;

/// Sink backed by a single dedicated PostgreSQL connection
///
/// A connection the server drops is discarded and reopened on the next
/// create, so a restarted database only costs the record in flight.
pub struct PgMessageSink {
    conn: Option<PgConnection>,
    options: PgConnectOptions,
    connect_timeout: Duration,
    partition: i32,
    closed: bool,
}

impl PgMessageSink {
    /// Wrap an open connection
    pub fn new(
        conn: PgConnection,
        options: PgConnectOptions,
        connect_timeout: Duration,
        partition: i32,
    ) -> Self {
        Self {
            conn: Some(conn),
            options,
            connect_timeout,
            partition,
            closed: false,
        }
    }

    /// Partition whose worker owns this sink
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Whether a live connection is currently held
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The held connection, reopening it when the previous one was lost
    async fn connection(&mut self) -> RepositoryResult<&mut PgConnection> {
        if self.closed {
            return Err(RepositoryError::Closed);
        }

        if self.conn.is_none() {
            let conn = open_connection(&self.options, self.connect_timeout).await?;
            tracing::info!(partition = self.partition, "Database connection re-established");
            self.conn = Some(conn);
        }

        self.conn.as_mut().ok_or(RepositoryError::Closed)
    }
}

/// Whether `err` leaves the connection unusable for further statements
pub(crate) fn is_connection_lost(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        // Class 57P: operator intervention (admin shutdown, crash shutdown,
        // cannot connect now). Class 08: connection exception.
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("57P") || code.starts_with("08"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Connect and ping, mapping failures onto repository errors
async fn open_connection(
    options: &PgConnectOptions,
    connect_timeout: Duration,
) -> RepositoryResult<PgConnection> {
    let mut conn = connection::connect(options, connect_timeout)
        .await
        .map_err(|e| match e {
            Error::Timeout(msg) => RepositoryError::Timeout(msg),
            other => RepositoryError::Connection(other.to_string()),
        })?;

    connection::health_check(&mut conn)
        .await
        .map_err(|e| RepositoryError::Connection(e.to_string()))?;

    Ok(conn)
}

#[async_trait]
impl MessageSink for PgMessageSink {
    async fn create(&mut self, message: &DomainMessage) -> RepositoryResult<i64> {
        let timer = Timer::start("messages.insert");
        let partition = self.partition;
        let conn = self.connection().await?;

        let result = sqlx::query_scalar::<_, i64>(INSERT_MESSAGE)
            .bind(&message.content)
            .bind(Json(&message.attributes))
            .bind(message.status.as_str())
            .bind(message.source_partition)
            .bind(message.source_offset)
            .bind(message.received_at)
            .fetch_one(conn)
            .await;

        match result {
            Ok(id) => {
                timer.stop();
                Ok(id)
            },
            Err(e) if is_connection_lost(&e) => {
                tracing::warn!(partition, error = %e, "Database connection lost, will reconnect");
                self.conn = None;
                Err(RepositoryError::Connection(e.to_string()))
            },
            Err(e) => Err(RepositoryError::Database(e)),
        }
    }

    async fn close(&mut self) -> RepositoryResult<()> {
        self.closed = true;
        match self.conn.take() {
            Some(conn) => {
                conn.close().await?;
                tracing::debug!(partition = self.partition, "Database connection closed");
                Ok(())
            },
            None => Ok(()),
        }
    }
}

/// Opens a dedicated PostgreSQL connection for each partition worker
#[derive(Debug, Clone)]
pub struct PgSinkFactory {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgSinkFactory {
    /// Create a factory from database configuration
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            options: connection::connect_options(config)?,
            connect_timeout: config.connect_timeout(),
        })
    }
}

#[async_trait]
impl SinkFactory for PgSinkFactory {
    type Sink = PgMessageSink;

    async fn open(&self, partition: i32) -> RepositoryResult<PgMessageSink> {
        let conn = open_connection(&self.options, self.connect_timeout).await?;

        tracing::debug!(partition, "Opened database connection for partition worker");
        Ok(PgMessageSink::new(
            conn,
            self.options.clone(),
            self.connect_timeout,
            partition,
        ))
    }
}
