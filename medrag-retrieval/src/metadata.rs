//! Ordinal-aligned metadata sidecar.
//!
//! Position `i` of the store describes the vector with id `i` in the paired
//! index. The store is persisted as a pretty-printed JSON array.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::document::IndexRecord;
use crate::error::{RagError, Result};

/// An ordered list of [`IndexRecord`]s.
///
/// Appending is crate-private: records only enter a store together with their
/// vector through [`AlignedStore::append_pair`](crate::store::AlignedStore::append_pair).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<IndexRecord>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append_aligned(&mut self, record: IndexRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// The record describing vector `id`.
    pub fn get(&self, id: usize) -> Option<&IndexRecord> {
        self.records.get(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in id order.
    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    /// Write the store as a JSON array.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.records)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read a store written by [`persist`](MetadataStore::persist).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CorpusLoad`] if the file is missing or is not an array of records.
    pub fn load(path: &Path) -> Result<Self> {
        let corpus = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| {
            RagError::corpus_load(&corpus, format!("cannot read metadata file: {e}"))
        })?;
        let records: Vec<IndexRecord> = serde_json::from_str(&content).map_err(|e| {
            RagError::corpus_load(&corpus, format!("malformed metadata file: {e}"))
        })?;
        Ok(Self { records })
    }
}
