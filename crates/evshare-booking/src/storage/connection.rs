use crate::config::DatabaseConfig;
use crate::error::{BookingError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Shared PostgreSQL pool
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| BookingError::database("connect", e))?;

        info!(
            "Connected to PostgreSQL (max_connections: {})",
            config.max_connections
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
