//! Tabular reader for paged documents (PDF)
//!
//! Each page becomes a table fragment of rows of cells. For PDFs the rows are rebuilt from
//! where the text is drawn (see [`super::layout`]); pages supplied as text split one row per
//! line, cells separated by tabs or runs of two or more spaces.
//!
//! The first fragment's first row is the header for the whole document. A later fragment
//! that starts by repeating the header loses that row; rows with the wrong number of cells
//! are dropped and counted.

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use super::layout;
use super::object_store::Location;
use super::tabular::TableBuilder;
use super::{SourceKind, SourceReader};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use lopdf::Document;
use reqwest::Client;
use retail_common::types::{Dataset, RawValue};
use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Descriptor of a document holding one table across its pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Local path or `http(s)://` URL
    pub location: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Rows of cells from one page
pub type Fragment = Vec<Vec<String>>;

/// Table fragments of every page, in page order
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fragments(&self) -> Result<Vec<Fragment>>;
}

/// Delimited page text already in memory
#[async_trait]
impl PageSource for Vec<String> {
    async fn fragments(&self) -> Result<Vec<Fragment>> {
        Ok(self.iter().map(|page| page_fragment(page)).collect())
    }
}

/// PDF pages fetched from a path or URL and extracted with lopdf
pub struct PdfPages {
    location: String,
    client: Client,
    policy: RetryPolicy,
}

impl PdfPages {
    pub fn new(location: impl Into<String>, timeout_secs: u64, policy: RetryPolicy) -> Result<Self> {
        Ok(Self {
            location: location.into(),
            client: http::build_client(timeout_secs)?,
            policy,
        })
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        match Location::parse(&self.location)? {
            Location::Http(url) => {
                Ok(http::get_bytes(&self.client, &self.policy, &url, &[], None)
                    .await?
                    .value)
            },
            Location::File(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| EtlError::source_unavailable(path.display().to_string(), e)),
            Location::S3 { .. } => Err(EtlError::Config(format!(
                "documents are read from a path or URL, not '{}'",
                self.location
            ))),
        }
    }
}

/// Rebuild each page's table rows from the positions of its text
pub fn extract_pdf_fragments(bytes: &[u8]) -> Result<Vec<Fragment>> {
    let document =
        Document::load_mem(bytes).map_err(|e| EtlError::decode(format!("invalid PDF: {}", e)))?;

    document
        .get_pages()
        .into_iter()
        .map(|(number, page_id)| -> Result<Fragment> {
            let content = document
                .get_and_decode_page_content(page_id)
                .map_err(|e| EtlError::decode(format!("page {}: {}", number, e)))?;
            Ok(layout::rows_from_runs(layout::text_runs(&content.operations)))
        })
        .collect()
}

#[async_trait]
impl PageSource for PdfPages {
    async fn fragments(&self) -> Result<Vec<Fragment>> {
        let bytes = self.fetch().await?;
        debug!(location = %self.location, bytes = bytes.len(), "Fetched document");

        tokio::task::spawn_blocking(move || extract_pdf_fragments(&bytes))
            .await
            .map_err(|e| EtlError::decode(format!("page extraction task failed: {}", e)))?
    }
}

/// Split one line into cells on tabs or runs of two or more spaces
pub fn split_cells(line: &str) -> Vec<String> {
    line.split('\t')
        .flat_map(|part| part.split("  "))
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse one page of delimited text into rows
pub fn page_fragment(text: &str) -> Fragment {
    text.lines()
        .map(split_cells)
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// Concatenate page fragments into one table under the first fragment's header
pub fn assemble_fragments(name: &str, fragments: Vec<Fragment>) -> Result<Dataset> {
    let mut fragments = fragments.into_iter().filter(|f| !f.is_empty());

    let mut first = match fragments.next() {
        Some(fragment) => fragment.into_iter(),
        None => return Err(EtlError::decode(format!("{}: document contains no table", name))),
    };
    let header = first.next().unwrap_or_default();

    let mut table = TableBuilder::new(name, header);
    for row in first {
        table.push_row(row.into_iter().map(RawValue::from));
    }

    for fragment in fragments {
        let mut rows = fragment.into_iter().peekable();
        if rows.peek().is_some_and(|row| row.as_slice() == table.header()) {
            rows.next();
        }
        for row in rows {
            table.push_row(row.into_iter().map(RawValue::from));
        }
    }

    Ok(table.finish())
}

pub struct DocumentReader {
    location: String,
    pages: Box<dyn PageSource>,
}

impl DocumentReader {
    pub fn new(source: DocumentSource, policy: RetryPolicy) -> Result<Self> {
        let pages = PdfPages::new(source.location.clone(), source.timeout_secs, policy)?;
        Ok(Self::from_pages(source.location, pages))
    }

    pub fn from_pages(location: impl Into<String>, pages: impl PageSource + 'static) -> Self {
        Self {
            location: location.into(),
            pages: Box::new(pages),
        }
    }
}

#[async_trait]
impl SourceReader for DocumentReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Document
    }

    fn describe(&self) -> String {
        self.location.clone()
    }

    async fn read(&self) -> Result<Dataset> {
        let fragments = self.pages.fragments().await?;
        let page_count = fragments.len();

        let dataset = assemble_fragments(&self.location, fragments)?;
        info!(
            location = %self.location,
            pages = page_count,
            rows = dataset.len(),
            malformed_rows = dataset.meta.malformed_rows,
            "Extracted document table"
        );
        Ok(dataset)
    }
}
