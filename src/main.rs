//! kafka-persist: consume a Kafka topic partition by partition and persist
//! every JSON message to PostgreSQL.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use kafka_persist::{
    config::{Cli, Config},
    db::{self, PgSinkFactory},
    error::Result,
    kafka::{KafkaLogSource, MessageCounter, MessageProcessor, Supervisor, SupervisorSettings},
    log_error, logging, shutdown,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment first, flags on top
    let mut config = Config::from_env()?;
    config.apply_cli(&cli);
    config.validate()?;

    logging::init_tracing(&config.logging.log_level, &config.logging.environment)?;
    config.log_config();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting kafka-persist");

    if config.database.run_migrations {
        db::migrate(&config.database).await?;
    }

    let source = KafkaLogSource::new(config.kafka.clone());
    let sinks = PgSinkFactory::new(&config.database)?;
    let counter = Arc::new(MessageCounter::new(config.processing.message_count_start));

    let token = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(token.clone());

    let supervisor = Supervisor::new(
        source,
        sinks,
        SupervisorSettings::from_config(&config),
        MessageProcessor::from_config(&config.processing),
        counter,
        token.clone(),
    );

    let result = supervisor.run().await;
    token.cancel();
    signals.abort();

    match result {
        Ok(report) => {
            report.log_summary();
            tracing::info!("kafka-persist shutdown complete");
            Ok(())
        },
        Err(e) => {
            log_error!(e, "Consumer failed to start", kind = e.kind());
            Err(e)
        },
    }
}
