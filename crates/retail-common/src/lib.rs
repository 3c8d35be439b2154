//! Retail Common Library
//!
//! Shared types, logging and error handling for the retail data pipeline.
//!
//! # Overview
//!
//! This crate provides functionality used across all workspace members:
//!
//! - **Error Handling**: the pipeline error taxonomy and result alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: raw and normalized record model shared by readers, normalizer and loaders
//!
//! # Example
//!
//! ```no_run
//! use retail_common::types::{Dataset, RawRecord, RawValue};
//!
//! let mut record = RawRecord::new();
//! record.insert("store_code", RawValue::from("WEB-1388012W"));
//!
//! let mut dataset = Dataset::new("stores");
//! dataset.push(record);
//! assert_eq!(dataset.columns(), ["store_code"]);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorKind, EtlError, Rejection, Result};
