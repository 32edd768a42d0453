//! Storage seams: the raw data store fed by collectors, and typed tables for
//! tool-layer and domain-layer rows.

mod raw;
mod table;

use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub use raw::{JsonlRawStore, MemoryRawStore, RawDataStore};
pub use table::{JsonlTable, MemoryTable, Record, TableStore};

/// `{dir}/{table}.jsonl`, rejecting names that could leave `dir`.
pub(crate) fn table_file(dir: &Path, table: &str) -> Result<PathBuf, StoreError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(StoreError::InvalidTable(table.to_string()));
    }
    Ok(dir.join(format!("{table}.jsonl")))
}

/// Forward-only, finite cursor over a snapshot of stored rows.
#[derive(Debug)]
pub struct Cursor<T> {
    rows: std::vec::IntoIter<T>,
}

impl<T> Cursor<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }

    /// Rows not yet yielded.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<T> ExactSizeIterator for Cursor<T> {}
