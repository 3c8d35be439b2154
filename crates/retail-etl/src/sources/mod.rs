//! Source readers
//!
//! Each source kind has one [`SourceReader`] implementation that turns a
//! [`SourceDescriptor`] into an unvalidated [`Dataset`]:
//!
//! | Kind | Reader | Transport |
//! |------|--------|-----------|
//! | `api` | [`api::ApiReader`] | reqwest, paged or counted |
//! | `object_store` | [`object_store::ObjectStoreReader`] | S3, HTTP(S) or local file |
//! | `relational` | [`relational::RelationalReader`] | sqlx / Postgres |
//! | `document` | [`document::DocumentReader`] | PDF text positions via lopdf |
//!
//! Readers never validate values; that is the normalizer's job. A reader fails only when the
//! source cannot be reached after retries (`SourceUnavailable`) or cannot be decoded
//! (`DecodeError`).

pub mod api;
pub mod document;
pub mod http;
pub mod layout;
pub mod object_store;
pub mod relational;
mod tabular;

use crate::retry::RetryPolicy;
use async_trait::async_trait;
use retail_common::types::Dataset;
use retail_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use api::{ApiReader, ApiSource, Pagination};
pub use document::{DocumentReader, DocumentSource, Fragment, PageSource};
pub use object_store::{FileFormat, ObjectStoreReader, ObjectStoreSource};
pub use relational::{RelationalReader, RelationalSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    ObjectStore,
    Relational,
    Document,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Api => "api",
            SourceKind::ObjectStore => "object_store",
            SourceKind::Relational => "relational",
            SourceKind::Document => "document",
        };
        f.write_str(s)
    }
}

/// Where a dataset comes from, as written in the pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Api(ApiSource),
    ObjectStore(ObjectStoreSource),
    Relational(RelationalSource),
    Document(DocumentSource),
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Api(_) => SourceKind::Api,
            SourceDescriptor::ObjectStore(_) => SourceKind::ObjectStore,
            SourceDescriptor::Relational(_) => SourceKind::Relational,
            SourceDescriptor::Document(_) => SourceKind::Document,
        }
    }
}

#[async_trait]
pub trait SourceReader: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human-readable location for logs
    fn describe(&self) -> String;

    async fn read(&self) -> Result<Dataset>;
}

/// Build the reader for a descriptor. No connection is made until `read`.
pub fn build_reader(
    descriptor: &SourceDescriptor,
    policy: &RetryPolicy,
) -> Result<Box<dyn SourceReader>> {
    let reader: Box<dyn SourceReader> = match descriptor {
        SourceDescriptor::Api(source) => Box::new(ApiReader::new(source.clone(), policy.clone())?),
        SourceDescriptor::ObjectStore(source) => {
            Box::new(ObjectStoreReader::new(source.clone(), policy.clone())?)
        },
        SourceDescriptor::Relational(source) => {
            Box::new(RelationalReader::new(source.clone(), policy.clone())?)
        },
        SourceDescriptor::Document(source) => {
            Box::new(DocumentReader::new(source.clone(), policy.clone())?)
        },
    };
    Ok(reader)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_is_tagged_by_kind() {
        let descriptor: SourceDescriptor = serde_json::from_value(json!({
            "kind": "object_store",
            "location": "s3://data-handling-public/products.csv"
        }))
        .unwrap();
        assert_eq!(descriptor.kind(), SourceKind::ObjectStore);

        let err = serde_json::from_value::<SourceDescriptor>(json!({"kind": "ftp"}));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_build_reader_for_each_kind() {
        let policy = RetryPolicy::immediate(1);
        let descriptors = [
            json!({"kind": "api", "base_url": "http://localhost", "pagination": {"mode": "paged"}}),
            json!({"kind": "object_store", "location": "/tmp/events.json"}),
            json!({"kind": "relational", "url": "postgres://u:p@localhost/db", "table": "legacy_users"}),
            json!({"kind": "document", "location": "/tmp/card_details.pdf"}),
        ];

        for value in descriptors {
            let descriptor: SourceDescriptor = serde_json::from_value(value).unwrap();
            let reader = build_reader(&descriptor, &policy).unwrap();
            assert_eq!(reader.kind(), descriptor.kind());
            assert!(!reader.describe().is_empty());
        }
    }
}
