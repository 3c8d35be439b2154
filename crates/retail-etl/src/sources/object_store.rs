//! Bulk-file reader for S3 objects, HTTP(S) URLs and local files
//!
//! Supported formats:
//!
//! - CSV with a header row. Rows with the wrong number of fields are dropped and counted.
//! - JSON as an array of objects, or column-oriented as `{"column": {"0": value, ...}}`.

use super::api::json_record;
use super::http::{self, DEFAULT_TIMEOUT_SECS};
use super::tabular::TableBuilder;
use super::{SourceKind, SourceReader};
use crate::retry::{AttemptError, Retried, RetryPolicy};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client as S3Client;
use reqwest::Client;
use retail_common::types::{Dataset, RawRecord, RawValue};
use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Region used when neither the descriptor nor the environment names one
pub const DEFAULT_REGION: &str = "eu-west-1";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    /// Guess the format from the location's extension
    pub fn infer(location: &str) -> Option<Self> {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        match Path::new(path).extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            _ => None,
        }
    }
}

/// Descriptor of a file in an object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreSource {
    /// `s3://bucket/key`, `http(s)://...` or a filesystem path
    pub location: String,
    /// Inferred from the extension when absent
    #[serde(default)]
    pub format: Option<FileFormat>,
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible store
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ObjectStoreSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            format: None,
            region: None,
            endpoint: None,
            path_style: false,
            access_key: None,
            secret_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    S3 { bucket: String, key: String },
    Http(String),
    File(PathBuf),
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        if let Some(rest) = location.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Location::S3 {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
                _ => Err(EtlError::Config(format!(
                    "S3 location '{}' must look like s3://bucket/key",
                    location
                ))),
            };
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Location::Http(location.to_string()));
        }
        if location.is_empty() {
            return Err(EtlError::Config("empty object location".to_string()));
        }
        Ok(Location::File(PathBuf::from(location)))
    }
}

pub struct ObjectStoreReader {
    source: ObjectStoreSource,
    location: Location,
    format: FileFormat,
    client: Client,
    policy: RetryPolicy,
}

impl ObjectStoreReader {
    pub fn new(source: ObjectStoreSource, policy: RetryPolicy) -> Result<Self> {
        let location = Location::parse(&source.location)?;
        let format = source
            .format
            .or_else(|| FileFormat::infer(&source.location))
            .ok_or_else(|| {
                EtlError::Config(format!(
                    "cannot infer file format of '{}'; set `format`",
                    source.location
                ))
            })?;
        let client = http::build_client(source.timeout_secs)?;

        Ok(Self {
            source,
            location,
            format,
            client,
            policy,
        })
    }

    async fn s3_client(&self) -> S3Client {
        let region = self
            .source
            .region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = match (&self.source.access_key, &self.source.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version_latest()
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "retail-etl",
                )),
            _ => {
                let shared = aws_config::from_env().load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(region))
            .force_path_style(self.source.path_style);
        if let Some(endpoint) = &self.source.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        S3Client::from_conf(builder.build())
    }

    async fn fetch_s3(&self, bucket: &str, key: &str) -> Result<Retried<Vec<u8>>> {
        let client = self.s3_client().await;
        let operation = format!("s3://{}/{}", bucket, key);

        self.policy
            .run(&operation, |_| {
                let client = client.clone();
                let operation = operation.clone();
                async move {
                    let response = client
                        .get_object()
                        .bucket(bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|e| {
                            let message = DisplayErrorContext(&e).to_string();
                            match e {
                                SdkError::TimeoutError(_)
                                | SdkError::DispatchFailure(_)
                                | SdkError::ResponseError(_) => AttemptError::transient(message),
                                _ => AttemptError::Fatal(EtlError::source_unavailable(
                                    operation, message,
                                )),
                            }
                        })?;

                    let body = response
                        .body
                        .collect()
                        .await
                        .map_err(AttemptError::transient)?;
                    Ok(body.into_bytes().to_vec())
                }
            })
            .await
    }

    async fn fetch(&self) -> Result<Retried<Vec<u8>>> {
        match &self.location {
            Location::S3 { bucket, key } => self.fetch_s3(bucket, key).await,
            Location::Http(url) => http::get_bytes(&self.client, &self.policy, url, &[], None).await,
            Location::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| EtlError::source_unavailable(path.display().to_string(), e))?;
                Ok(Retried {
                    value: bytes,
                    retries: 0,
                })
            },
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Decode a CSV file with a header row
pub fn decode_csv(name: &str, bytes: &[u8]) -> Result<Dataset> {
    let text = std::str::from_utf8(strip_bom(bytes))
        .map_err(|e| EtlError::decode(format!("{}: not valid UTF-8: {}", name, e)))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| EtlError::decode(format!("{}: unreadable header: {}", name, e)))?
        .iter()
        .map(str::to_string)
        .collect();
    if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
        return Err(EtlError::decode(format!("{}: missing header row", name)));
    }

    let mut table = TableBuilder::new(name, header);
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| EtlError::decode(format!("{}: row {}: {}", name, line + 1, e)))?;
        let cells: Vec<RawValue> = row.iter().map(RawValue::from).collect();
        table.push_row(cells);
    }
    Ok(table.finish())
}

/// Decode a JSON file holding either an array of objects or column-oriented data
pub fn decode_json(name: &str, bytes: &[u8]) -> Result<Dataset> {
    let value: serde_json::Value = serde_json::from_slice(strip_bom(bytes))
        .map_err(|e| EtlError::decode(format!("{}: invalid JSON: {}", name, e)))?;

    let mut dataset = Dataset::new(name);
    match &value {
        serde_json::Value::Array(items) => {
            for item in items {
                dataset.push(json_record(item)?);
            }
        },
        serde_json::Value::Object(columns) => {
            dataset.extend(column_oriented_records(name, columns)?);
        },
        other => {
            return Err(EtlError::decode(format!(
                "{}: expected an array or object, found {}",
                name, other
            )))
        },
    }
    Ok(dataset)
}

fn column_oriented_records(
    name: &str,
    columns: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<RawRecord>> {
    let mut indices = std::collections::BTreeSet::new();
    for (column, cells) in columns {
        let cells = cells.as_object().ok_or_else(|| {
            EtlError::decode(format!("{}: column '{}' is not an index map", name, column))
        })?;
        for index in cells.keys() {
            let index: u64 = index.parse().map_err(|_| {
                EtlError::decode(format!("{}: column '{}' has non-numeric row index '{}'", name, column, index))
            })?;
            indices.insert(index);
        }
    }

    Ok(indices
        .into_iter()
        .map(|index| {
            let key = index.to_string();
            columns
                .iter()
                .map(|(column, cells)| {
                    let value = cells
                        .get(&key)
                        .map(RawValue::from_json)
                        .unwrap_or(RawValue::Null);
                    (column.as_str(), value)
                })
                .collect()
        })
        .collect())
}

#[async_trait]
impl SourceReader for ObjectStoreReader {
    fn kind(&self) -> SourceKind {
        SourceKind::ObjectStore
    }

    fn describe(&self) -> String {
        self.source.location.clone()
    }

    async fn read(&self) -> Result<Dataset> {
        let Retried { value: bytes, retries } = self.fetch().await?;
        debug!(location = %self.source.location, bytes = bytes.len(), retries, "Fetched object");

        let name = self.describe();
        let mut dataset = match self.format {
            FileFormat::Csv => decode_csv(&name, &bytes)?,
            FileFormat::Json => decode_json(&name, &bytes)?,
        };
        dataset.meta.retries = retries;

        info!(
            location = %self.source.location,
            rows = dataset.len(),
            malformed_rows = dataset.meta.malformed_rows,
            "Decoded object"
        );
        Ok(dataset)
    }
}
