//! Pipeline configuration
//!
//! Loaded from a YAML or TOML file and overlaid with `RETAIL_ETL__*` environment variables,
//! where `__` separates nested keys (`RETAIL_ETL__DESTINATION__URL`). A `.env` file in the
//! working directory is read first.

use crate::db::DbConfig;
use crate::load::WriteMode;
use crate::normalize::WarehouseTable;
use crate::retry::RetryPolicy;
use crate::sources::SourceDescriptor;
use config::{Environment, File};
use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.yaml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RETAIL_ETL";

/// Default number of datasets processed at once
pub const DEFAULT_CONCURRENCY: usize = 4;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub destination: DbConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub datasets: Vec<DatasetConfig>,
}

/// One warehouse table and where its data comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub table: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DatasetConfig {
    pub fn warehouse_table(&self) -> Result<WarehouseTable> {
        self.table.parse()
    }
}

impl PipelineConfig {
    /// Load from `path` plus environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EtlError::Config(format!("{}: {}", path.display(), e)))?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| EtlError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(EtlError::Config("no datasets configured".to_string()));
        }
        if self.concurrency == 0 {
            return Err(EtlError::Config("concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EtlError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.destination.url.trim().is_empty() {
            return Err(EtlError::Config("destination.url is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            let table = dataset.warehouse_table()?;
            if !seen.insert(table) {
                return Err(EtlError::Config(format!("table '{}' is configured twice", table)));
            }
        }
        Ok(())
    }

    /// Enabled datasets, restricted to `only` when it is non-empty
    pub fn selected(&self, only: &[WarehouseTable]) -> Result<Vec<&DatasetConfig>> {
        let mut selected = Vec::new();
        for dataset in &self.datasets {
            let table = dataset.warehouse_table()?;
            if dataset.enabled && (only.is_empty() || only.contains(&table)) {
                selected.push(dataset);
            }
        }
        Ok(selected)
    }
}
