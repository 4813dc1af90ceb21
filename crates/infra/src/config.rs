//! Environment-driven configuration for the durable store.

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_MAX_CONNECTIONS: &str = "EVENT_STORE_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {0}: {1}")]
    InvalidVar(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Read configuration from the environment.
    ///
    /// `DATABASE_URL` is required; `EVENT_STORE_MAX_CONNECTIONS` defaults
    /// to 5.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var(ENV_DATABASE_URL)
            .map_err(|_| ConfigError::MissingVar(ENV_DATABASE_URL))?;

        let max_connections = match std::env::var(ENV_MAX_CONNECTIONS) {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidVar(ENV_MAX_CONNECTIONS, e.to_string()))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
    }
}
