//! Page-at-a-time persistence to two independent writers.
//!
//! The CSV file is the authoritative local artifact, the relational table is
//! best-effort. Neither write blocks or undoes the other, and a failure in either
//! is logged without stopping the crawl.

mod file;
mod relational;

pub use file::{csv_header, csv_row, FileSink};
pub use relational::{store_columns, store_row, Cell, PostgresStore, RelationalSink, RowStore};

use log::error;

use crate::record::PersistedRow;

/// What each writer managed for one page. `None` means that writer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub file_rows: Option<usize>,
    pub store_rows: Option<u64>,
}

pub struct PersistenceSink<S> {
    file: FileSink,
    relational: RelationalSink<S>,
}

impl<S: RowStore> PersistenceSink<S> {
    pub fn new(file: FileSink, relational: RelationalSink<S>) -> Self {
        Self { file, relational }
    }

    pub fn file(&self) -> &FileSink {
        &self.file
    }

    pub fn relational(&self) -> &RelationalSink<S> {
        &self.relational
    }

    /// Appends one page to the file, then inserts it into the store.
    pub async fn flush_page(&mut self, page: u32, rows: &[PersistedRow]) -> FlushReport {
        let file_rows = match self.file.append(rows) {
            Ok(written) => Some(written),
            Err(err) => {
                error!("Couldn't append page {page} to the CSV: {err}");
                None
            }
        };

        let store_rows = match self.relational.write_page(rows).await {
            Ok(inserted) => Some(inserted),
            Err(_) => {
                error!("Page {page} is missing from the database, the crawl goes on.");
                None
            }
        };

        FlushReport {
            file_rows,
            store_rows,
        }
    }
}
