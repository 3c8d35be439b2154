//! Pipeline orchestrator
//!
//! Runs Reader -> Normalizer -> Load Adapter for each dataset. Datasets are independent and
//! run concurrently (bounded by `concurrency`); within a dataset the stages are sequential.
//! A dataset moves through
//!
//! ```text
//! Pending -> Extracted -> Normalized -> Loaded
//!    |           |            |
//!    +-----------+------------+--> Failed { stage, kind }
//! ```
//!
//! and a failure only ever affects its own dataset.

use crate::config::PipelineConfig;
use crate::load::{LoadAdapter, WriteMode};
use crate::normalize::{normalize, DatasetSchema, WarehouseTable};
use crate::sources::{build_reader, SourceReader};
use futures::stream::{self, StreamExt};
use retail_common::{ErrorKind, EtlError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Normalize,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => f.write_str("extract"),
            Stage::Normalize => f.write_str("normalize"),
            Stage::Load => f.write_str("load"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DatasetState {
    Pending,
    Extracted,
    Normalized,
    Loaded,
    Failed { stage: Stage, kind: ErrorKind },
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetState::Pending => f.write_str("pending"),
            DatasetState::Extracted => f.write_str("extracted"),
            DatasetState::Normalized => f.write_str("normalized"),
            DatasetState::Loaded => f.write_str("loaded"),
            DatasetState::Failed { stage, kind } => write!(f, "failed during {} ({})", stage, kind),
        }
    }
}

/// One unit of work: read a source, normalize it against a schema, load it into a table
pub struct DatasetJob {
    pub table: String,
    pub reader: Box<dyn SourceReader>,
    pub schema: DatasetSchema,
    pub mode: WriteMode,
}

impl DatasetJob {
    /// Job for a warehouse table using its built-in schema
    pub fn new(table: WarehouseTable, reader: Box<dyn SourceReader>, mode: WriteMode) -> Self {
        Self {
            table: table.as_str().to_string(),
            reader,
            schema: table.schema(),
            mode,
        }
    }

    pub fn with_schema(schema: DatasetSchema, reader: Box<dyn SourceReader>, mode: WriteMode) -> Self {
        Self {
            table: schema.name.clone(),
            reader,
            schema,
            mode,
        }
    }
}

/// Build jobs for the enabled datasets of a configuration
pub fn jobs_from_config(config: &PipelineConfig, only: &[WarehouseTable]) -> Result<Vec<DatasetJob>> {
    config
        .selected(only)?
        .into_iter()
        .map(|dataset| {
            let table = dataset.warehouse_table()?;
            let reader = build_reader(&dataset.source, &config.retry)?;
            Ok(DatasetJob::new(table, reader, dataset.mode))
        })
        .collect()
}

/// Final record of one dataset's run
#[derive(Debug, Clone, Serialize)]
pub struct DatasetOutcome {
    pub table: String,
    pub state: DatasetState,
    pub rows_extracted: usize,
    pub malformed_rows: usize,
    pub retries: u32,
    pub rows_rejected: usize,
    pub duplicates_dropped: usize,
    pub rows_loaded: u64,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl DatasetOutcome {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: DatasetState::Pending,
            rows_extracted: 0,
            malformed_rows: 0,
            retries: 0,
            rows_rejected: 0,
            duplicates_dropped: 0,
            rows_loaded: 0,
            error: None,
            duration_seconds: 0.0,
        }
    }

    fn advance(&mut self, state: DatasetState) {
        info!(table = %self.table, from = %self.state, to = %state, "Dataset state changed");
        self.state = state;
    }

    fn fail(&mut self, stage: Stage, err: EtlError) {
        let kind = err.kind();
        error!(table = %self.table, stage = %stage, kind = %kind, error = %err, "Dataset failed");
        self.state = DatasetState::Failed { stage, kind };
        self.error = Some(err.to_string());
    }

    pub fn is_loaded(&self) -> bool {
        self.state == DatasetState::Loaded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub outcomes: Vec<DatasetOutcome>,
    pub duration_seconds: f64,
}

impl PipelineReport {
    /// Every dataset reached `Loaded`
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(DatasetOutcome::is_loaded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_loaded())
            .map(|o| o.table.as_str())
            .collect()
    }

    pub fn outcome(&self, table: &str) -> Option<&DatasetOutcome> {
        self.outcomes.iter().find(|o| o.table == table)
    }

    pub fn rows_loaded(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_loaded).sum()
    }
}

/// One line per dataset, with its error underneath when it failed
impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:<40} {:>9} {:>9} {:>7} {:>9} {:>6} {:>9}",
            "TABLE", "STATE", "EXTRACTED", "MALFORMED", "RETRIES", "REJECTED", "DUPES", "LOADED"
        )?;
        for outcome in &self.outcomes {
            writeln!(
                f,
                "{:<20} {:<40} {:>9} {:>9} {:>7} {:>9} {:>6} {:>9}",
                outcome.table,
                outcome.state.to_string(),
                outcome.rows_extracted,
                outcome.malformed_rows,
                outcome.retries,
                outcome.rows_rejected,
                outcome.duplicates_dropped,
                outcome.rows_loaded
            )?;
            if let Some(error) = &outcome.error {
                writeln!(f, "    error: {}", error)?;
            }
        }
        Ok(())
    }
}

pub struct Pipeline {
    loader: Arc<dyn LoadAdapter>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(loader: Arc<dyn LoadAdapter>, concurrency: usize) -> Self {
        Self {
            loader,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every job; the report lists outcomes in job order
    pub async fn run(&self, jobs: Vec<DatasetJob>) -> PipelineReport {
        let start_time = Instant::now();
        let total = jobs.len();

        info!(
            datasets = total,
            concurrency = self.concurrency,
            destination = self.loader.name(),
            "Starting pipeline"
        );

        let mut outcomes: Vec<(usize, DatasetOutcome)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| {
                let span = info_span!("dataset", table = %job.table);
                async move { (index, self.run_job(job).await) }.instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let report = PipelineReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        };

        info!(
            datasets = total,
            failed = report.failed().len(),
            rows_loaded = report.rows_loaded(),
            duration_seconds = report.duration_seconds,
            "Pipeline finished"
        );
        report
    }

    async fn run_job(&self, job: DatasetJob) -> DatasetOutcome {
        let start_time = Instant::now();
        let mut outcome = DatasetOutcome::new(&job.table);
        info!(source = %job.reader.describe(), kind = %job.reader.kind(), "Reading source");

        self.run_stages(&job, &mut outcome).await;

        outcome.duration_seconds = start_time.elapsed().as_secs_f64();
        outcome
    }

    async fn run_stages(&self, job: &DatasetJob, outcome: &mut DatasetOutcome) {
        let mut dataset = match job.reader.read().await {
            Ok(dataset) => dataset,
            Err(e) => return outcome.fail(Stage::Extract, e),
        };
        dataset.name = job.table.clone();
        outcome.rows_extracted = dataset.len();
        outcome.malformed_rows = dataset.meta.malformed_rows;
        outcome.retries = dataset.meta.retries;
        outcome.advance(DatasetState::Extracted);

        let normalized = match normalize(&dataset, &job.schema) {
            Ok(normalized) => normalized,
            Err(e) => return outcome.fail(Stage::Normalize, e),
        };
        outcome.rows_rejected = normalized.report.rejected_rows;
        outcome.duplicates_dropped = normalized.report.duplicates_dropped;
        outcome.advance(DatasetState::Normalized);

        match self.loader.load(&normalized, &job.table, job.mode).await {
            Ok(rows) => {
                outcome.rows_loaded = rows;
                outcome.advance(DatasetState::Loaded);
            },
            Err(e) => outcome.fail(Stage::Load, e),
        }
    }
}
