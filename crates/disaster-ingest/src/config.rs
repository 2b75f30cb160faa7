//! Consumer configuration
//!
//! Loaded from the environment (after reading `.env`). An `ENVIRONMENT`
//! profile sets defaults first; explicit variables always win.

use std::str::FromStr;
use std::time::Duration;

use disaster_common::{DisasterError, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Kafka Configuration Constants
// ============================================================================

/// Default broker list.
pub const DEFAULT_KAFKA_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Default topic carrying disaster packets.
pub const DEFAULT_KAFKA_TOPIC: &str = "disaster-data-ingestion";

/// Default consumer group; offsets are tracked by the broker per group.
pub const DEFAULT_KAFKA_CONSUMER_GROUP: &str = "disaster-consumer-group";

/// Default session timeout in milliseconds.
pub const DEFAULT_KAFKA_SESSION_TIMEOUT_MS: u64 = 30_000;

/// Default offset reset policy when the group has no committed offset.
pub const DEFAULT_KAFKA_AUTO_OFFSET_RESET: &str = "earliest";

// ============================================================================
// Database Configuration Constants
// ============================================================================

pub const DEFAULT_POSTGRES_HOST: &str = "localhost";
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_POSTGRES_DB: &str = "disaster_data";
pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_PASSWORD: &str = "postgres";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Consumer Behavior Constants
// ============================================================================

/// Default number of messages fetched per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default sleep between batches in continuous mode.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default time to wait for messages before closing a batch.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;

/// Consecutive failed batches before an alert is logged.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = DisasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DisasterError::config(format!(
                "unknown ENVIRONMENT '{other}' (expected development, testing or production)"
            ))),
        }
    }
}

/// Where packets come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Kafka,
    /// JSON lines file
    File,
    /// Built-in sample packets
    Mock,
}

impl FromStr for SourceKind {
    type Err = DisasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "kafka" => Ok(SourceKind::Kafka),
            "file" => Ok(SourceKind::File),
            "mock" => Ok(SourceKind::Mock),
            other => Err(DisasterError::config(format!(
                "unknown source '{other}' (expected kafka, file or mock)"
            ))),
        }
    }
}

/// Full consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub environment: Environment,
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub consumer: BatchConfig,
}

/// Kafka consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub consumer_group: String,
    pub session_timeout_ms: u64,
    pub auto_offset_reset: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Batch and loop behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub source: SourceKind,
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub poll_timeout_ms: u64,
    pub continuous: bool,
    pub store_invalid_packets: bool,
    pub failure_threshold: u32,
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl ConsumerConfig {
    /// Load configuration from `.env`, the process environment and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let environment = env
            .parse::<Environment>("ENVIRONMENT")?
            .unwrap_or_default();
        let mut config = Self::for_environment(environment);

        let kafka = &mut config.kafka;
        env.set_string("KAFKA_BOOTSTRAP_SERVERS", &mut kafka.bootstrap_servers);
        env.set_string("KAFKA_TOPIC", &mut kafka.topic);
        env.set_string("KAFKA_CONSUMER_GROUP", &mut kafka.consumer_group);
        env.set("KAFKA_SESSION_TIMEOUT_MS", &mut kafka.session_timeout_ms)?;
        env.set_string("KAFKA_AUTO_OFFSET_RESET", &mut kafka.auto_offset_reset);

        let database = &mut config.database;
        database.url = match env.get("DATABASE_URL") {
            Some(url) => url,
            None => {
                let port = env
                    .parse::<u16>("POSTGRES_PORT")?
                    .unwrap_or(DEFAULT_POSTGRES_PORT);
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    env.get("POSTGRES_USER")
                        .unwrap_or_else(|| DEFAULT_POSTGRES_USER.to_string()),
                    env.get("POSTGRES_PASSWORD")
                        .unwrap_or_else(|| DEFAULT_POSTGRES_PASSWORD.to_string()),
                    env.get("POSTGRES_HOST")
                        .unwrap_or_else(|| DEFAULT_POSTGRES_HOST.to_string()),
                    port,
                    env.get("POSTGRES_DB")
                        .unwrap_or_else(|| DEFAULT_POSTGRES_DB.to_string()),
                )
            },
        };
        env.set("DATABASE_MAX_CONNECTIONS", &mut database.max_connections)?;
        env.set("DATABASE_MIN_CONNECTIONS", &mut database.min_connections)?;
        env.set("DATABASE_CONNECT_TIMEOUT", &mut database.connect_timeout_secs)?;
        env.set("DATABASE_IDLE_TIMEOUT", &mut database.idle_timeout_secs)?;

        let consumer = &mut config.consumer;
        env.set("CONSUMER_SOURCE", &mut consumer.source)?;
        env.set("CONSUMER_BATCH_SIZE", &mut consumer.batch_size)?;
        env.set("CONSUMER_POLL_INTERVAL_SECS", &mut consumer.poll_interval_secs)?;
        env.set("CONSUMER_POLL_TIMEOUT_MS", &mut consumer.poll_timeout_ms)?;
        if let Some(flag) = env.flag("CONSUMER_CONTINUOUS")? {
            consumer.continuous = flag;
        }
        if let Some(flag) = env.flag("CONSUMER_STORE_INVALID_PACKETS")? {
            consumer.store_invalid_packets = flag;
        }
        env.set("CONSUMER_FAILURE_THRESHOLD", &mut consumer.failure_threshold)?;

        config.validate()?;

        Ok(config)
    }

    /// Profile defaults before any variable overrides
    pub fn for_environment(environment: Environment) -> Self {
        let mut config = Self {
            environment,
            ..Self::default()
        };

        match environment {
            Environment::Production => {
                config.consumer.batch_size = 100;
                config.database.max_connections = 50;
            },
            Environment::Testing => {
                config.consumer.batch_size = 5;
                config.consumer.continuous = false;
                config.consumer.source = SourceKind::Mock;
            },
            Environment::Development => {},
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(DisasterError::config("Kafka bootstrap servers cannot be empty"));
        }

        if self.kafka.topic.trim().is_empty() {
            return Err(DisasterError::config("Kafka topic cannot be empty"));
        }

        if self.database.url.is_empty() {
            return Err(DisasterError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(DisasterError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DisasterError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.consumer.batch_size == 0 {
            return Err(DisasterError::config("Batch size must be greater than 0"));
        }

        if self.consumer.failure_threshold == 0 {
            tracing::warn!("Failure threshold is 0 - every failed batch will raise an alert");
        }

        Ok(())
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            kafka: KafkaConfig {
                bootstrap_servers: DEFAULT_KAFKA_BOOTSTRAP_SERVERS.to_string(),
                topic: DEFAULT_KAFKA_TOPIC.to_string(),
                consumer_group: DEFAULT_KAFKA_CONSUMER_GROUP.to_string(),
                session_timeout_ms: DEFAULT_KAFKA_SESSION_TIMEOUT_MS,
                auto_offset_reset: DEFAULT_KAFKA_AUTO_OFFSET_RESET.to_string(),
            },
            database: DatabaseConfig {
                url: format!(
                    "postgresql://{DEFAULT_POSTGRES_USER}:{DEFAULT_POSTGRES_PASSWORD}@{DEFAULT_POSTGRES_HOST}:{DEFAULT_POSTGRES_PORT}/{DEFAULT_POSTGRES_DB}"
                ),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            consumer: BatchConfig {
                source: SourceKind::Kafka,
                batch_size: DEFAULT_BATCH_SIZE,
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
                continuous: false,
                store_invalid_packets: true,
                failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            },
        }
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    DisasterError::config(format!("invalid value for {key} ('{raw}'): {e}"))
                })
            })
            .transpose()
    }

    fn set<T>(&self, key: &str, slot: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.parse(key)? {
            *slot = value;
        }
        Ok(())
    }

    fn set_string(&self, key: &str, slot: &mut String) {
        if let Some(value) = self.get(key) {
            *slot = value;
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|raw| match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(DisasterError::config(format!(
                    "invalid value for {key} ('{raw}'): expected true or false"
                ))),
            })
            .transpose()
    }
}
