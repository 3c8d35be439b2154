//! Paginated REST API reader
//!
//! Two pagination modes are supported:
//!
//! - `paged`: `GET {base_url}/{path}?{page_param}=N` from `first_page` upward until a page
//!   returns no items or its `has_more_field` is `false`
//! - `counted`: `GET {count_path}` for the number of items, then `GET {item_path}` once per
//!   index with `{index}` substituted; item requests overlap up to `concurrency`
//!
//! Every request is retried on its own, so a flaky page costs retries rather than the whole
//! extraction.

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use super::{SourceKind, SourceReader};
use crate::retry::{Retried, RetryPolicy};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use retail_common::types::{Dataset, RawRecord, RawValue};
use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default header carrying the API key
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Default number of overlapping item requests in counted mode
pub const DEFAULT_ITEM_CONCURRENCY: usize = 8;

/// Upper bound on pages read in paged mode
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

fn default_api_key_header() -> String {
    DEFAULT_API_KEY_HEADER.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_item_concurrency() -> usize {
    DEFAULT_ITEM_CONCURRENCY
}

/// Descriptor of a paginated API source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSource {
    pub base_url: String,
    /// Opaque credential sent as `api_key_header`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pagination {
    Paged {
        #[serde(default)]
        path: String,
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_first_page")]
        first_page: u32,
        /// Field holding the item array; the body itself when absent
        #[serde(default)]
        items_field: Option<String>,
        /// Boolean field that ends pagination when present and false
        #[serde(default)]
        has_more_field: Option<String>,
        /// Safety bound; reaching it before an end signal fails the read
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
    Counted {
        count_path: String,
        count_field: String,
        /// Path template containing `{index}`
        item_path: String,
        #[serde(default = "default_item_concurrency")]
        concurrency: usize,
    },
}

pub struct ApiReader {
    source: ApiSource,
    client: Client,
    policy: RetryPolicy,
}

impl ApiReader {
    pub fn new(source: ApiSource, policy: RetryPolicy) -> Result<Self> {
        let client = http::build_client(source.timeout_secs)?;
        Ok(Self {
            source,
            client,
            policy,
        })
    }

    fn auth_header(&self) -> Option<(&str, &str)> {
        self.source
            .api_key
            .as_deref()
            .map(|key| (self.source.api_key_header.as_str(), key))
    }

    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<Retried<serde_json::Value>> {
        http::get_json(&self.client, &self.policy, url, query, self.auth_header()).await
    }

    async fn read_paged(
        &self,
        path: &str,
        page_param: &str,
        first_page: u32,
        items_field: Option<&str>,
        has_more_field: Option<&str>,
        max_pages: u32,
    ) -> Result<Dataset> {
        let url = http::join_url(&self.source.base_url, path);
        let mut dataset = Dataset::new(self.describe());

        for page in (first_page..).take(max_pages as usize) {
            let query = [(page_param.to_string(), page.to_string())];
            let Retried { value: body, retries } = self.get(&url, &query).await?;
            dataset.meta.retries += retries;

            let items = page_items(&body, items_field)
                .map_err(|e| EtlError::decode(format!("{} page {}: {}", url, page, e)))?;
            if items.is_empty() {
                debug!(url = %url, page, "Reached empty page");
                return Ok(dataset);
            }

            debug!(url = %url, page, items = items.len(), retries, "Fetched page");
            for item in items {
                dataset.push(json_record(item)?);
            }

            let has_more = has_more_field
                .and_then(|field| body.get(field))
                .and_then(serde_json::Value::as_bool);
            if has_more == Some(false) {
                return Ok(dataset);
            }
        }

        warn!(url = %url, max_pages, "Page limit reached before the last page");
        Err(EtlError::decode(format!(
            "{}: page limit of {} reached before end of pages",
            url, max_pages
        )))
    }

    async fn read_counted(
        &self,
        count_path: &str,
        count_field: &str,
        item_path: &str,
        concurrency: usize,
    ) -> Result<Dataset> {
        let count_url = http::join_url(&self.source.base_url, count_path);
        let Retried { value: body, retries } = self.get(&count_url, &[]).await?;

        let count = body.get(count_field).and_then(serde_json::Value::as_u64).ok_or_else(|| {
            EtlError::decode(format!("{}: missing integer field '{}'", count_url, count_field))
        })?;
        info!(url = %count_url, count, "Fetching items");

        let items: Vec<Retried<serde_json::Value>> = stream::iter(0..count)
            .map(|index| {
                let url = http::join_url(
                    &self.source.base_url,
                    &item_path.replace("{index}", &index.to_string()),
                );
                async move { self.get(&url, &[]).await }
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        let mut dataset = Dataset::new(self.describe());
        dataset.meta.retries = retries;
        for item in items {
            dataset.meta.retries += item.retries;
            dataset.push(json_record(&item.value)?);
        }
        Ok(dataset)
    }
}

/// Extract the item array of one page
fn page_items<'a>(
    body: &'a serde_json::Value,
    items_field: Option<&str>,
) -> std::result::Result<&'a Vec<serde_json::Value>, String> {
    let items = match items_field {
        Some(field) => body
            .get(field)
            .ok_or_else(|| format!("missing field '{}'", field))?,
        None => body,
    };
    items
        .as_array()
        .ok_or_else(|| "expected an array of items".to_string())
}

/// One JSON object becomes one record, keeping key order
pub(crate) fn json_record(item: &serde_json::Value) -> Result<RawRecord> {
    let object = item
        .as_object()
        .ok_or_else(|| EtlError::decode(format!("expected a JSON object, found {}", item)))?;
    Ok(object
        .iter()
        .map(|(key, value)| (key.as_str(), RawValue::from_json(value)))
        .collect())
}

#[async_trait]
impl SourceReader for ApiReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn describe(&self) -> String {
        match &self.source.pagination {
            Pagination::Paged { path, .. } => http::join_url(&self.source.base_url, path),
            Pagination::Counted { item_path, .. } => http::join_url(&self.source.base_url, item_path),
        }
    }

    async fn read(&self) -> Result<Dataset> {
        match &self.source.pagination {
            Pagination::Paged {
                path,
                page_param,
                first_page,
                items_field,
                has_more_field,
                max_pages,
            } => {
                self.read_paged(
                    path,
                    page_param,
                    *first_page,
                    items_field.as_deref(),
                    has_more_field.as_deref(),
                    *max_pages,
                )
                .await
            },
            Pagination::Counted {
                count_path,
                count_field,
                item_path,
                concurrency,
            } => {
                self.read_counted(count_path, count_field, item_path, *concurrency)
                    .await
            },
        }
    }
}
