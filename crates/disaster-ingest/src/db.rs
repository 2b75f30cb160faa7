//! Connection pool and schema migrations

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::IngestError;

/// Embedded migrations for `disaster_events`, `consumption_statistics` and
/// `invalid_packets`
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Open a connection pool
///
/// Failing to connect means the sink is unavailable.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, IngestError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .connect(&config.url)
        .await
        .map_err(|e| IngestError::SinkUnavailable(format!("cannot connect to database: {e}")))?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply pending migrations
pub async fn migrate(pool: &PgPool) -> Result<(), IngestError> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
