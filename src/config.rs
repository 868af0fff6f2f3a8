//! Configuration module for kafka-persist
//!
//! Configuration is loaded from environment variables (and a `.env` file in
//! development), then the command-line flags are layered on top of it.

use clap::Parser;
use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::db::RetryConfig;
use crate::error::{Error, Result};
use crate::models::OffsetPolicy;

/// Command-line flags
///
/// Every flag falls back to the matching environment variable, so the
/// binary can be driven entirely from the environment in containers.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "kafka-persist", version, about = "Consume a Kafka topic into PostgreSQL")]
pub struct Cli {
    /// List of brokers to connect to (comma-separated)
    #[arg(long = "broker-list", env = "KAFKA_BROKERS", value_delimiter = ',')]
    pub broker_list: Option<Vec<String>>,

    /// Topic name
    #[arg(long, env = "KAFKA_TOPIC")]
    pub topic: Option<String>,

    /// Expected number of partitions (0 disables the check)
    #[arg(long, env = "KAFKA_PARTITION_HINT")]
    pub partition: Option<i32>,

    /// Offset type: oldest (-2) or newest (-1)
    #[arg(long = "offset-type", env = "KAFKA_OFFSET_TYPE", allow_hyphen_values = true)]
    pub offset_type: Option<OffsetPolicy>,

    /// Starting value of the processed-message counter
    #[arg(long = "message-count-start", env = "MESSAGE_COUNT_START")]
    pub message_count_start: Option<u64>,
}

/// Main configuration structure for kafka-persist
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct Config {
    /// Logging configuration
    #[serde(flatten)]
    #[envconfig(nested = true)]
    pub logging: LoggingConfig,

    /// Kafka configuration
    #[serde(flatten)]
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    /// Database configuration
    #[serde(flatten)]
    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    /// Processing configuration
    #[serde(flatten)]
    #[envconfig(nested = true)]
    pub processing: ProcessingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct LoggingConfig {
    /// Log level
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,
}

impl LoggingConfig {
    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated)
    #[envconfig(from = "KAFKA_BROKERS", default = "broker:9092")]
    pub brokers: String,

    /// Topic to consume
    #[envconfig(from = "KAFKA_TOPIC", default = "database")]
    pub topic: String,

    /// Consumer group ID. librdkafka insists on one even though partitions
    /// are assigned manually and no offsets are committed.
    #[envconfig(from = "KAFKA_CONSUMER_GROUP", default = "kafka-persist")]
    pub consumer_group: String,

    /// Expected partition count, 0 when unknown
    #[envconfig(from = "KAFKA_PARTITION_HINT", default = "0")]
    pub partition_hint: i32,

    /// Where a new partition reader starts
    #[envconfig(from = "KAFKA_OFFSET_TYPE", default = "oldest")]
    pub offset_policy: OffsetPolicy,

    /// Timeout for topic metadata requests in milliseconds
    #[envconfig(from = "KAFKA_METADATA_TIMEOUT_MS", default = "10000")]
    pub metadata_timeout_ms: u64,

    /// Session timeout in milliseconds
    #[envconfig(from = "KAFKA_SESSION_TIMEOUT_MS", default = "30000")]
    pub session_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "broker:9092".to_string(),
            topic: "database".to_string(),
            consumer_group: "kafka-persist".to_string(),
            partition_hint: 0,
            offset_policy: OffsetPolicy::Oldest,
            metadata_timeout_ms: 10_000,
            session_timeout_ms: 30_000,
        }
    }
}

impl KafkaConfig {
    /// Get brokers as a vector
    pub fn brokers_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Get metadata timeout as Duration
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    /// Build the rdkafka client configuration shared by every partition reader
    pub fn build_consumer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", self.brokers_list().join(","))
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("auto.offset.reset", self.offset_policy.auto_offset_reset());

        config
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[envconfig(from = "POSTGRES_URL")]
    pub url: String,

    /// Per-connection connect timeout in seconds
    #[envconfig(from = "DATABASE_CONNECT_TIMEOUT_SECONDS", default = "30")]
    pub connect_timeout_seconds: u64,

    /// Run embedded migrations on startup
    #[envconfig(from = "DATABASE_RUN_MIGRATIONS", default = "true")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Mask password in URL for logging
    pub fn masked_url(&self) -> String {
        if let Some(at_pos) = self.url.find('@') {
            if let Some(scheme_end) = self.url.find("://") {
                let start = &self.url[..scheme_end + 3];
                let end = &self.url[at_pos..];
                return format!("{}***{}", start, end);
            }
        }
        "***".to_string()
    }
}

/// What a worker does with a record whose create call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistFailurePolicy {
    /// Log the failure and move on to the next record
    #[default]
    Drop,
    /// Retry retryable failures with exponential backoff, then drop
    Retry,
}

impl FromStr for PersistFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(PersistFailurePolicy::Drop),
            "retry" => Ok(PersistFailurePolicy::Retry),
            other => Err(Error::config(format!(
                "Unknown persist failure policy '{}' (expected drop or retry)",
                other
            ))),
        }
    }
}

impl fmt::Display for PersistFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistFailurePolicy::Drop => write!(f, "drop"),
            PersistFailurePolicy::Retry => write!(f, "retry"),
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct ProcessingConfig {
    /// Starting value of the processed-message counter
    #[envconfig(from = "MESSAGE_COUNT_START", default = "0")]
    pub message_count_start: u64,

    /// Failure policy for create calls
    #[envconfig(from = "PERSIST_FAILURE_POLICY", default = "drop")]
    pub persist_failure_policy: PersistFailurePolicy,

    /// Maximum retry attempts under the retry policy
    #[envconfig(from = "MAX_RETRIES", default = "3")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    #[envconfig(from = "RETRY_BASE_MS", default = "100")]
    pub retry_base_ms: u64,

    /// Maximum retry delay in milliseconds
    #[envconfig(from = "RETRY_MAX_MS", default = "10000")]
    pub retry_max_ms: u64,

    /// How long to wait for workers to drain on shutdown, in seconds
    #[envconfig(from = "SHUTDOWN_TIMEOUT_SECS", default = "30")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            message_count_start: 0,
            persist_failure_policy: PersistFailurePolicy::Drop,
            max_retries: 3,
            retry_base_ms: 100,
            retry_max_ms: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ProcessingConfig {
    /// Retry settings used under the retry policy
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_backoff(self.retry_base_ms)
            .with_max_backoff(self.retry_max_ms)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        Config::init_from_env().map_err(Error::from)
    }

    /// Apply command-line overrides on top of the environment
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(brokers) = &cli.broker_list {
            self.kafka.brokers = brokers.join(",");
        }
        if let Some(topic) = &cli.topic {
            self.kafka.topic = topic.clone();
        }
        if let Some(partition) = cli.partition {
            self.kafka.partition_hint = partition;
        }
        if let Some(policy) = cli.offset_type {
            self.kafka.offset_policy = policy;
        }
        if let Some(start) = cli.message_count_start {
            self.processing.message_count_start = start;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers_list().is_empty() {
            return Err(Error::config("Kafka brokers cannot be empty"));
        }

        if self.kafka.topic.trim().is_empty() {
            return Err(Error::config("Kafka topic cannot be empty"));
        }

        if self.kafka.partition_hint < 0 {
            return Err(Error::config("Partition hint cannot be negative"));
        }

        if self.database.url.is_empty() {
            return Err(Error::config("Database URL cannot be empty"));
        }

        if self.processing.retry_base_ms > self.processing.retry_max_ms {
            return Err(Error::config(
                "RETRY_BASE_MS cannot be larger than RETRY_MAX_MS",
            ));
        }

        Ok(())
    }

    /// Log configuration (with sensitive data masked)
    pub fn log_config(&self) {
        tracing::info!(
            environment = %self.logging.environment,
            log_level = %self.logging.log_level,
            "Logging configuration"
        );

        tracing::info!(
            brokers = %self.kafka.brokers,
            topic = %self.kafka.topic,
            offset_policy = %self.kafka.offset_policy,
            partition_hint = self.kafka.partition_hint,
            "Kafka configuration"
        );

        tracing::info!(
            url = %self.database.masked_url(),
            run_migrations = self.database.run_migrations,
            "Database configuration"
        );

        tracing::info!(
            persist_failure_policy = %self.processing.persist_failure_policy,
            max_retries = self.processing.max_retries,
            message_count_start = self.processing.message_count_start,
            "Processing configuration"
        );
    }
}
