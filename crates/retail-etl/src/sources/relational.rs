//! Snapshot reader for a table in a Postgres database
//!
//! Column names come from `information_schema.columns` in ordinal order; rows are read with
//! `row_to_json` so every Postgres type arrives as a JSON scalar.

use super::{SourceKind, SourceReader};
use crate::db::{self, DbConfig};
use crate::ident::{quote_identifier, validate_identifier};
use crate::retry::{Retried, RetryPolicy};
use async_trait::async_trait;
use retail_common::types::{Dataset, RawRecord, RawValue};
use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

/// Descriptor of a relational table snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalSource {
    #[serde(flatten)]
    pub database: DbConfig,
    pub table: String,
}

pub struct RelationalReader {
    source: RelationalSource,
    pool: PgPool,
    policy: RetryPolicy,
}

impl RelationalReader {
    pub fn new(source: RelationalSource, policy: RetryPolicy) -> Result<Self> {
        validate_identifier(&source.database.schema)?;
        validate_identifier(&source.table)?;
        let pool = db::lazy_pool(&source.database)?;
        Ok(Self::with_pool(source, pool, policy))
    }

    pub fn with_pool(source: RelationalSource, pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            source,
            pool,
            policy,
        }
    }

    /// Column names of the table in ordinal order
    pub async fn columns(&self) -> Result<Retried<Vec<String>>> {
        let name = self.describe();
        let name = name.as_str();
        self.policy
            .run(name, move |_| async move {
                sqlx::query_scalar::<_, String>(
                    "SELECT column_name::text FROM information_schema.columns \
                     WHERE table_schema = $1 AND table_name = $2 \
                     ORDER BY ordinal_position",
                )
                .bind(&self.source.database.schema)
                .bind(&self.source.table)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db::read_attempt_error(name, e))
            })
            .await
    }

    /// Base tables in the source schema, sorted by name
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let schema = self.source.database.schema.as_str();
        let tables = self
            .policy
            .run(schema, move |_| async move {
                sqlx::query_scalar::<_, String>(
                    "SELECT table_name::text FROM information_schema.tables \
                     WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .bind(schema)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db::read_attempt_error(schema, e))
            })
            .await?;

        info!(schema, tables = tables.value.len(), retries = tables.retries, "Listed source tables");
        Ok(tables.value)
    }

    async fn rows(&self) -> Result<Retried<Vec<String>>> {
        let name = self.describe();
        let sql = format!(
            "SELECT row_to_json(t)::text FROM {}.{} t",
            quote_identifier(&self.source.database.schema)?,
            quote_identifier(&self.source.table)?
        );

        let (name, sql) = (name.as_str(), sql.as_str());
        self.policy
            .run(name, move |_| async move {
                sqlx::query_scalar::<_, String>(sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| db::read_attempt_error(name, e))
            })
            .await
    }
}

fn row_record(columns: &[String], row: &str) -> Result<RawRecord> {
    let value: serde_json::Value =
        serde_json::from_str(row).map_err(|e| EtlError::decode(format!("invalid row JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| EtlError::decode("row_to_json did not return an object"))?;

    Ok(columns
        .iter()
        .map(|column| {
            let value = object.get(column).map(RawValue::from_json).unwrap_or(RawValue::Null);
            (column.as_str(), value)
        })
        .collect())
}

#[async_trait]
impl SourceReader for RelationalReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Relational
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.source.database.schema, self.source.table)
    }

    async fn read(&self) -> Result<Dataset> {
        let columns = self.columns().await?;
        if columns.value.is_empty() {
            return Err(EtlError::source_unavailable(self.describe(), "table not found"));
        }
        let rows = self.rows().await?;

        let mut dataset = Dataset::new(self.describe());
        dataset.meta.retries = columns.retries + rows.retries;
        for row in &rows.value {
            dataset.push(row_record(&columns.value, row)?);
        }

        info!(
            table = %self.describe(),
            columns = columns.value.len(),
            rows = dataset.len(),
            "Read table snapshot"
        );
        Ok(dataset)
    }
}
