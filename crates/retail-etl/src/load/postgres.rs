//! Postgres load adapter
//!
//! One load is one transaction:
//!
//! 1. `pg_advisory_xact_lock(hashtext('<schema>.<table>'))` serializes writers of the table
//! 2. `Replace` drops and recreates the table; `Append` creates it if missing
//! 3. rows are inserted in batches that stay under the bind-parameter limit
//! 4. commit, or roll back on any error

use super::{LoadAdapter, WriteMode};
use crate::db::{self, DbConfig};
use crate::ident::quote_identifier;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use retail_common::types::{ColumnDef, ColumnType, NormalizedDataset, NormalizedRecord, Value};
use retail_common::{EtlError, Result};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bind parameters allowed per INSERT, below the Postgres limit of 65535
const MAX_BINDS_PER_STATEMENT: usize = 60_000;

pub struct PostgresLoader {
    pool: PgPool,
    schema: String,
}

impl PostgresLoader {
    pub fn new(config: &DbConfig) -> Result<Self> {
        Ok(Self::with_pool(db::lazy_pool(config)?, &config.schema))
    }

    pub fn with_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dataset: &NormalizedDataset,
        table: &str,
        mode: WriteMode,
    ) -> std::result::Result<u64, sqlx::Error> {
        let qualified = format!("{}.{}", self.schema, table);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&qualified)
            .execute(&mut **tx)
            .await?;

        let target = format!("{}.{}", quote(&self.schema)?, quote(table)?);
        let column_sql = dataset
            .columns
            .iter()
            .map(column_definition)
            .collect::<std::result::Result<Vec<_>, _>>()?
            .join(", ");

        match mode {
            WriteMode::Replace => {
                sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
                    .execute(&mut **tx)
                    .await?;
                sqlx::query(&format!("CREATE TABLE {} ({})", target, column_sql))
                    .execute(&mut **tx)
                    .await?;
            },
            WriteMode::Append => {
                sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {} ({})", target, column_sql))
                    .execute(&mut **tx)
                    .await?;
            },
        }

        if dataset.columns.is_empty() {
            return Ok(0);
        }

        let column_list = dataset
            .columns
            .iter()
            .map(|c| quote(&c.name))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .join(", ");
        let batch_size = (MAX_BINDS_PER_STATEMENT / dataset.columns.len()).max(1);

        let mut written = 0;
        for batch in dataset.records.chunks(batch_size) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", target, column_list));
            query_builder.push_values(batch, |mut b, record: &NormalizedRecord| {
                for (value, column) in record.values.iter().zip(&dataset.columns) {
                    push_value(&mut b, value, column.column_type);
                }
            });

            written += query_builder.build().execute(&mut **tx).await?.rows_affected();
            debug!(table, written, "Inserted batch");
        }

        Ok(written)
    }
}

fn quote(name: &str) -> std::result::Result<String, sqlx::Error> {
    quote_identifier(name).map_err(|e| sqlx::Error::Protocol(e.to_string()))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text | ColumnType::Category => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp => "TIMESTAMP",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Uuid => "UUID",
    }
}

fn column_definition(column: &ColumnDef) -> std::result::Result<String, sqlx::Error> {
    let null = if column.nullable { "" } else { " NOT NULL" };
    Ok(format!("{} {}{}", quote(&column.name)?, sql_type(column.column_type), null))
}

fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value, column_type: ColumnType) {
    match value {
        Value::Text(s) | Value::Category(s) => b.push_bind(s.clone()),
        Value::Integer(i) => b.push_bind(*i),
        Value::Float(f) => b.push_bind(*f),
        Value::Date(d) => b.push_bind(*d),
        Value::Timestamp(t) => b.push_bind(*t),
        Value::Boolean(v) => b.push_bind(*v),
        Value::Uuid(u) => b.push_bind(*u),
        Value::Null => match column_type {
            ColumnType::Text | ColumnType::Category => b.push_bind(None::<String>),
            ColumnType::Integer => b.push_bind(None::<i64>),
            ColumnType::Float => b.push_bind(None::<f64>),
            ColumnType::Date => b.push_bind(None::<NaiveDate>),
            ColumnType::Timestamp => b.push_bind(None::<NaiveDateTime>),
            ColumnType::Boolean => b.push_bind(None::<bool>),
            ColumnType::Uuid => b.push_bind(None::<Uuid>),
        },
    };
}

#[async_trait]
impl LoadAdapter for PostgresLoader {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, dataset: &NormalizedDataset, table: &str, mode: WriteMode) -> Result<u64> {
        quote_identifier(&self.schema)?;
        quote_identifier(table)?;
        for column in &dataset.columns {
            quote_identifier(&column.name)?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EtlError::destination_write(table, e))?;

        match self.write(&mut tx, dataset, table, mode).await {
            Ok(rows) => {
                tx.commit()
                    .await
                    .map_err(|e| EtlError::destination_write(table, e))?;
                info!(table, schema = %self.schema, rows, mode = %mode, "Loaded table");
                Ok(rows)
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(table, error = %rollback, "Rollback failed");
                }
                Err(EtlError::destination_write(table, e))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_column_definitions() {
        let column = ColumnDef {
            name: "EAN".to_string(),
            column_type: ColumnType::Text,
            nullable: false,
        };
        assert_eq!(column_definition(&column).unwrap(), "\"EAN\" TEXT NOT NULL");

        let column = ColumnDef {
            name: "latitude".to_string(),
            column_type: ColumnType::Float,
            nullable: true,
        };
        assert_eq!(column_definition(&column).unwrap(), "\"latitude\" DOUBLE PRECISION");
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(sql_type(ColumnType::Category), "TEXT");
        assert_eq!(sql_type(ColumnType::Integer), "BIGINT");
        assert_eq!(sql_type(ColumnType::Uuid), "UUID");
    }

    #[tokio::test]
    async fn test_invalid_table_name_fails_before_connecting() {
        let loader = PostgresLoader::new(&DbConfig::new("postgres://u:p@127.0.0.1:1/db")).unwrap();
        let dataset = NormalizedDataset {
            name: "t".to_string(),
            key_column: "id".to_string(),
            columns: Vec::new(),
            records: Vec::new(),
            report: Default::default(),
        };

        let err = loader.load(&dataset, "bad-name", WriteMode::Replace).await.unwrap_err();
        assert_eq!(err.kind(), retail_common::ErrorKind::ConfigError);
    }
}
