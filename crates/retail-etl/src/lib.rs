//! Retail ETL Library
//!
//! Centralises retail data from heterogeneous sources into a star-schema warehouse.
//!
//! # Stages
//!
//! - **Sources**: paginated REST APIs, CSV/JSON files in object stores, relational table
//!   snapshots and tables printed in PDF documents, all producing raw datasets
//! - **Normalize**: per-column cleaning rules, record filtering and key deduplication
//! - **Load**: full-refresh writes to Postgres, or to memory for dry runs
//! - **Pipeline**: runs every dataset through the three stages concurrently, isolating failures
//!
//! # Example
//!
//! ```no_run
//! use retail_etl::config::PipelineConfig;
//! use retail_etl::load::PostgresLoader;
//! use retail_etl::pipeline::{jobs_from_config, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load("config/pipeline.yaml")?;
//!     let loader = Arc::new(PostgresLoader::new(&config.destination)?);
//!
//!     let report = Pipeline::new(loader, config.concurrency)
//!         .run(jobs_from_config(&config, &[])?)
//!         .await;
//!     anyhow::ensure!(report.is_success(), "failed datasets: {:?}", report.failed());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod ident;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod sources;
