use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::retry::AttemptError;

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_schema() -> String {
    "public".to_string()
}

/// Connection settings for a Postgres database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            schema: default_schema(),
        }
    }
}

/// Build a pool that connects on first use
pub fn lazy_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy(&config.url)
        .map_err(|e| EtlError::Config(format!("invalid database URL: {}", e)))?;

    tracing::debug!(
        max_connections = config.max_connections,
        schema = %config.schema,
        "Database connection pool configured"
    );

    Ok(pool)
}

/// Whether retrying the operation could succeed
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed
    )
}

/// Classify a read-side error: connection problems are retried, anything else is fatal
pub fn read_attempt_error(source_name: &str, err: sqlx::Error) -> AttemptError {
    if is_transient(&err) {
        return AttemptError::transient(err);
    }
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            AttemptError::Fatal(EtlError::decode(format!("{}: {}", source_name, err)))
        },
        other => AttemptError::Fatal(EtlError::source_unavailable(source_name, other)),
    }
}
