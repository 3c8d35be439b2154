//! In-process destination used for dry runs and tests

use super::{LoadAdapter, WriteMode};
use crate::ident::validate_identifier;
use async_trait::async_trait;
use retail_common::types::{ColumnDef, NormalizedDataset, NormalizedRecord};
use retail_common::{EtlError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub records: Vec<NormalizedRecord>,
}

impl MemoryTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
pub struct MemoryLoader {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn table(&self, name: &str) -> Option<MemoryTable> {
        self.tables.read().await.get(name).cloned()
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl LoadAdapter for MemoryLoader {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, dataset: &NormalizedDataset, table: &str, mode: WriteMode) -> Result<u64> {
        validate_identifier(table)?;

        // Stage outside the lock, swap in under it
        let staged = MemoryTable {
            columns: dataset.columns.clone(),
            records: dataset.records.clone(),
        };
        let rows = staged.len() as u64;

        let mut tables = self.tables.write().await;
        match mode {
            WriteMode::Replace => {
                tables.insert(table.to_string(), staged);
            },
            WriteMode::Append => match tables.get_mut(table) {
                Some(existing) if existing.columns != staged.columns => {
                    return Err(EtlError::destination_write(
                        table,
                        "appended columns differ from the existing table",
                    ));
                },
                Some(existing) => existing.records.extend(staged.records),
                None => {
                    tables.insert(table.to_string(), staged);
                },
            },
        }

        info!(table, rows, mode = %mode, "Loaded table into memory");
        Ok(rows)
    }
}
