//! Database module for kafka-persist
//!
//! This module provides the PostgreSQL persistence sink, per-worker
//! connections, and the embedded schema migrations.

pub mod connection;
pub mod message_repo;
pub mod repository;

// Re-export commonly used types
pub use message_repo::{PgMessageSink, PgSinkFactory};
pub use repository::{
    MessageSink, RepositoryError, RepositoryResult, RetryConfig, SinkFactory,
};

use sqlx::migrate::Migrator;
use sqlx::postgres::PgConnection;
use sqlx::Connection;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Database migrator for running schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations on an open connection
pub async fn run_migrations(conn: &mut PgConnection) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(conn).await
}

/// Connect once, apply pending migrations, and disconnect
pub async fn migrate(config: &DatabaseConfig) -> Result<()> {
    let options = connection::connect_options(config)?;
    let mut conn = connection::connect(&options, config.connect_timeout()).await?;

    run_migrations(&mut conn)
        .await
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

    conn.close()
        .await
        .map_err(|e| Error::database(format!("Failed to close migration connection: {}", e)))?;

    tracing::info!(
        migrations = MIGRATOR.iter().count(),
        "Database migrations applied"
    );
    Ok(())
}
