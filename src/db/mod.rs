//! Database connection management.
//!
//! One bounded pool is shared by the queue poller and the request facade.
//! Each gateway operation acquires a connection for the duration of a
//! single statement, so there are no cross-operation transactions to leak.

pub mod gateway;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub use gateway::Gateway;

/// Pool sizing: a steady floor for the two resident tasks plus overflow
/// headroom for request bursts.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: 5,
            max_connections: 15,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Create the shared connection pool.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let mut options = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);

    if let Some(idle_timeout) = config.idle_timeout {
        options = options.idle_timeout(idle_timeout);
    }

    let pool = options.connect(&config.database_url).await?;
    info!(
        max_connections = config.max_connections,
        "database connection pool created"
    );
    Ok(pool)
}
