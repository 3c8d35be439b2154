//! Error types for the retail pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the pipeline
///
/// Dataset-level variants are fatal for the dataset they occur in and never for the
/// pipeline. [`EtlError::RecordInvalid`] is row-level: the normalizer recovers from it by
/// dropping and counting the row.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source unavailable: {source_name}: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid record in column '{column}': {rejection}")]
    RecordInvalid {
        column: String,
        rejection: Rejection,
    },

    #[error("Destination write error for table '{table}': {message}")]
    DestinationWrite { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn source_unavailable(source_name: impl Into<String>, message: impl ToString) -> Self {
        EtlError::SourceUnavailable {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(message: impl ToString) -> Self {
        EtlError::Decode(message.to_string())
    }

    pub fn destination_write(table: impl Into<String>, message: impl ToString) -> Self {
        EtlError::DestinationWrite {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Classify the error for logs and pipeline reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            EtlError::Decode(_) => ErrorKind::DecodeError,
            EtlError::RecordInvalid { .. } => ErrorKind::RecordInvalid,
            EtlError::DestinationWrite { .. } => ErrorKind::DestinationWriteError,
            EtlError::Config(_) => ErrorKind::ConfigError,
            EtlError::Io(_) => ErrorKind::IoError,
        }
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Decode(err.to_string())
    }
}

/// Error classification surfaced in the final pipeline report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    DecodeError,
    RecordInvalid,
    DestinationWriteError,
    ConfigError,
    IoError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::DecodeError => "DecodeError",
            ErrorKind::RecordInvalid => "RecordInvalid",
            ErrorKind::DestinationWriteError => "DestinationWriteError",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::IoError => "IoError",
        };
        write!(f, "{}", s)
    }
}

/// Why a single column value was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("missing value in non-nullable column")]
    Missing,

    #[error("cannot coerce '{value}' to {expected}")]
    Coercion { expected: String, value: String },

    #[error("domain check failed: {0}")]
    Domain(String),
}
