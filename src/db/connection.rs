//! Database connection management for kafka-persist
//!
//! Every partition worker gets its own connection; there is no pool. This
//! module builds the connect options once and opens connections from them
//! with a bounded connect timeout.

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Parse connect options from the configured URL
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| Error::config(format!("Invalid database URL: {}", e)))?
        // Set application name for monitoring
        .application_name("kafka-persist")
        // Enable statement logging in debug mode
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

    Ok(options)
}

/// Open a single connection, bounded by `timeout`
pub async fn connect(options: &PgConnectOptions, timeout: Duration) -> Result<PgConnection> {
    let conn = tokio::time::timeout(timeout, options.connect())
        .await
        .map_err(|_| Error::Timeout(format!("Database connect exceeded {:?}", timeout)))?
        .map_err(|e| Error::database(format!("Failed to connect to database: {}", e)))?;

    Ok(conn)
}

/// Connection health check
///
/// Verifies that the connection is alive by executing a trivial query.
pub async fn health_check(conn: &mut PgConnection) -> Result<()> {
    let start = std::time::Instant::now();

    conn.ping()
        .await
        .map_err(|e| Error::database(format!("Health check failed: {}", e)))?;

    let elapsed = start.elapsed();

    if elapsed > Duration::from_secs(1) {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis(),
            "Database health check slow"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            connect_timeout_seconds: 1,
            run_migrations: false,
        }
    }

    #[test]
    fn test_connect_options_from_url() {
        let options = connect_options(&config("postgresql://user:pw@db.internal:6543/app")).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("app"));
    }

    #[test]
    fn test_connect_options_invalid_url() {
        let err = connect_options(&config("not a url")).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
