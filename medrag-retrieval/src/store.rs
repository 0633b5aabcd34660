//! Vector index and metadata sidecar owned as one unit.
//!
//! [`AlignedStore`] is the only way to put vectors into a corpus: every append
//! adds one vector and its metadata record together, so `index.len()` and
//! `metadata.len()` cannot drift apart. Persisting writes both artifacts as a
//! single build transaction.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::document::{IndexRecord, SearchResult};
use crate::error::{RagError, Result};
use crate::index::{FlatIndex, Metric, PersistentIndex, VectorIndex};
use crate::metadata::MetadataStore;

/// A named corpus: vector index plus positionally aligned metadata.
#[derive(Debug, Clone)]
pub struct AlignedStore<I: PersistentIndex = FlatIndex> {
    name: String,
    index: I,
    metadata: MetadataStore,
}

impl AlignedStore<FlatIndex> {
    /// Create an empty store backed by an exact [`FlatIndex`].
    pub fn new(name: impl Into<String>, metric: Metric, dimension: usize) -> Result<Self> {
        Self::with_index(name, FlatIndex::new(metric, dimension)?)
    }
}

impl<I: PersistentIndex> AlignedStore<I> {
    /// Create a store around an empty index of any backend.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::BuildIntegrity`] if the index already holds vectors
    /// (they would have no metadata).
    pub fn with_index(name: impl Into<String>, index: I) -> Result<Self> {
        let name = name.into();
        if !index.is_empty() {
            return Err(RagError::build_integrity(
                name,
                format!("index already holds {} vectors without metadata", index.len()),
            ));
        }
        Ok(Self { name, index, metadata: MetadataStore::new() })
    }

    /// Append one vector with the record describing it. Returns the shared id.
    ///
    /// The vector is validated before anything is stored, so a failed append
    /// leaves the store unchanged.
    pub fn append_pair(&mut self, vector: &[f32], record: IndexRecord) -> Result<usize> {
        let id = self.index.add(vector)?;
        let record_id = self.metadata.append_aligned(record);
        if id != record_id {
            return Err(RagError::build_integrity(
                &self.name,
                format!("vector id {id} does not match metadata position {record_id}"),
            ));
        }
        Ok(id)
    }

    /// The record for vector `id`.
    pub fn get(&self, id: usize) -> Option<&IndexRecord> {
        self.metadata.get(id)
    }

    /// Corpus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of vector/record pairs.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Metric of the underlying index.
    pub fn metric(&self) -> Metric {
        self.index.metric()
    }

    /// Vector dimension of the underlying index.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Read access to the index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// Read access to the metadata.
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Search the index and resolve each hit to its record, preserving index rank order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let neighbors = self.index.search(query, k)?;
        neighbors
            .into_iter()
            .map(|n| {
                let record = self.metadata.get(n.id).cloned().ok_or_else(|| {
                    RagError::corpus_load(&self.name, format!("no metadata record for vector {}", n.id))
                })?;
                Ok(SearchResult { record, score: n.score })
            })
            .collect()
    }

    /// Persist index and metadata as one build transaction.
    ///
    /// Both artifacts are written to temporary siblings first and only renamed
    /// into place once both writes succeeded. Existing artifacts are moved to
    /// `.bak` siblings for the swap and restored if any rename fails, so a
    /// failed persist leaves the previous pair (or nothing) in place.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::BuildIntegrity`] on a count mismatch or any write failure.
    pub fn persist(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        if self.index.len() != self.metadata.len() {
            return Err(RagError::build_integrity(
                &self.name,
                format!(
                    "index has {} vectors but metadata has {} records",
                    self.index.len(),
                    self.metadata.len()
                ),
            ));
        }

        for path in [index_path, metadata_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    RagError::build_integrity(&self.name, format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let index_tmp = temp_sibling(index_path);
        let metadata_tmp = temp_sibling(metadata_path);

        let written = self
            .index
            .persist(&index_tmp)
            .and_then(|()| self.metadata.persist(&metadata_tmp));
        if let Err(e) = written {
            remove_quietly(&index_tmp);
            remove_quietly(&metadata_tmp);
            error!(corpus = %self.name, error = %e, "failed to write corpus artifacts");
            return Err(RagError::build_integrity(&self.name, format!("write failed: {e}")));
        }

        // Previous artifacts move aside first so a failed swap can put them back.
        let mut plan: Vec<(PathBuf, PathBuf)> = [index_path, metadata_path]
            .into_iter()
            .filter(|live| live.exists())
            .map(|live| (live.to_path_buf(), backup_sibling(live)))
            .collect();
        plan.push((index_tmp.clone(), index_path.to_path_buf()));
        plan.push((metadata_tmp.clone(), metadata_path.to_path_buf()));

        let mut done: Vec<&(PathBuf, PathBuf)> = Vec::with_capacity(plan.len());
        for step in &plan {
            let (from, to) = step;
            if let Err(e) = fs::rename(from, to) {
                for (from, to) in done.into_iter().rev() {
                    let _ = fs::rename(to, from);
                }
                remove_quietly(&index_tmp);
                remove_quietly(&metadata_tmp);
                error!(corpus = %self.name, error = %e, "failed to swap corpus artifacts into place");
                return Err(RagError::build_integrity(
                    &self.name,
                    format!("cannot move {} into place: {e}", to.display()),
                ));
            }
            done.push(step);
        }
        for live in [index_path, metadata_path] {
            remove_quietly(&backup_sibling(live));
        }

        info!(
            corpus = %self.name,
            vectors = self.len(),
            index = %index_path.display(),
            metadata = %metadata_path.display(),
            "persisted corpus"
        );
        Ok(())
    }

    /// Load a persisted corpus and verify the alignment invariant.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CorpusLoad`] for missing or corrupt artifacts and
    /// for a vector/record count mismatch.
    pub fn load(name: impl Into<String>, index_path: &Path, metadata_path: &Path) -> Result<Self> {
        let name = name.into();
        let index = I::load(index_path).map_err(|e| attribute_to(e, &name))?;
        let metadata = MetadataStore::load(metadata_path).map_err(|e| attribute_to(e, &name))?;
        if index.len() != metadata.len() {
            return Err(RagError::corpus_load(
                name,
                format!(
                    "index has {} vectors but metadata has {} records",
                    index.len(),
                    metadata.len()
                ),
            ));
        }
        Ok(Self { name, index, metadata })
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn backup_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Re-label a load error produced by a path-only reader with the corpus name.
fn attribute_to(err: RagError, corpus: &str) -> RagError {
    match err {
        RagError::CorpusLoad { corpus: path, message } => {
            RagError::corpus_load(corpus, format!("{path}: {message}"))
        }
        other => RagError::corpus_load(corpus, other.to_string()),
    }
}
