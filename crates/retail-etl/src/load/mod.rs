//! Load adapters
//!
//! A [`LoadAdapter`] writes one [`NormalizedDataset`] as one named table. Writes are
//! all-or-nothing: readers of the destination see either the previous contents or the new
//! ones, never a partial load.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryLoader, MemoryTable};
pub use postgres::PostgresLoader;

use async_trait::async_trait;
use retail_common::types::NormalizedDataset;
use retail_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a load treats existing contents of the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Drop and recreate the table
    #[default]
    Replace,
    /// Create the table if needed and add rows
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Replace => f.write_str("replace"),
            WriteMode::Append => f.write_str("append"),
        }
    }
}

#[async_trait]
pub trait LoadAdapter: Send + Sync {
    /// Short destination name for logs
    fn name(&self) -> &'static str;

    /// Write `dataset` to `table`, returning the number of rows written
    async fn load(&self, dataset: &NormalizedDataset, table: &str, mode: WriteMode) -> Result<u64>;
}
