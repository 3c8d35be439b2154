//! Header-driven table assembly shared by the CSV and document readers

use retail_common::types::{Dataset, RawRecord, RawValue};
use tracing::debug;

pub(crate) struct TableBuilder {
    dataset: Dataset,
    header: Vec<String>,
}

impl TableBuilder {
    pub(crate) fn new(name: &str, header: Vec<String>) -> Self {
        Self {
            dataset: Dataset::new(name),
            header,
        }
    }

    pub(crate) fn header(&self) -> &[String] {
        &self.header
    }

    /// Add one row; a row whose width differs from the header is dropped and counted
    pub(crate) fn push_row<I>(&mut self, cells: I) -> bool
    where
        I: IntoIterator<Item = RawValue>,
        I::IntoIter: ExactSizeIterator,
    {
        let cells = cells.into_iter();
        if cells.len() != self.header.len() {
            self.dataset.meta.malformed_rows += 1;
            debug!(
                dataset = %self.dataset.name,
                expected = self.header.len(),
                found = cells.len(),
                "Dropping malformed row"
            );
            return false;
        }

        let record: RawRecord = self.header.iter().cloned().zip(cells).collect();
        self.dataset.push(record);
        true
    }

    pub(crate) fn finish(self) -> Dataset {
        self.dataset
    }
}
