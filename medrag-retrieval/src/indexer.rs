//! Corpus indexer: chunk → embed → append to an [`AlignedStore`] → persist.
//!
//! # Example
//!
//! ```rust,ignore
//! use medrag_retrieval::{CorpusConfig, CorpusIndexer, CorpusKind};
//!
//! let indexer = CorpusIndexer::builder()
//!     .config(CorpusConfig::builder(CorpusKind::Guidelines, 384).artifact_dir("artifacts").build()?)
//!     .embedding_provider(Arc::new(my_embedder))
//!     .build()?;
//!
//! let summary = indexer.build_and_persist(&corpus.documents).await?;
//! ```

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::chunking::Chunker;
use crate::config::CorpusConfig;
use crate::document::{Document, IndexRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::store::AlignedStore;

/// Counts reported by a finished build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSummary {
    /// Documents that went into the build.
    pub documents: usize,
    /// Vector/record pairs written.
    pub vectors: usize,
}

/// Builds the index and metadata artifacts of one corpus.
///
/// Construct one via [`CorpusIndexer::builder()`].
pub struct CorpusIndexer {
    config: CorpusConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Box<dyn Chunker>,
}

impl CorpusIndexer {
    /// Create a new [`CorpusIndexerBuilder`].
    pub fn builder() -> CorpusIndexerBuilder {
        CorpusIndexerBuilder::default()
    }

    /// Return the corpus configuration.
    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// Chunk and embed `documents` into an in-memory store.
    ///
    /// Chunks are numbered in document order and embedded in batches of
    /// `embed_batch_size`, with up to `embed_concurrency` batches in flight.
    /// Results are slotted back by chunk id, so vector `i` and record `i`
    /// always describe the same chunk regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if any batch fails or comes back with
    /// the wrong number of vectors, and [`RagError::DimensionMismatch`] if a
    /// vector does not fit the index. Nothing is persisted in either case.
    pub async fn build(&self, documents: &[Document]) -> Result<AlignedStore> {
        let mut store = AlignedStore::new(&self.config.name, self.config.metric, self.config.dimension)?;

        let records: Vec<IndexRecord> = documents
            .iter()
            .flat_map(|doc| {
                self.chunker.chunk(doc).into_iter().map(move |chunk| IndexRecord::for_chunk(doc, &chunk))
            })
            .collect();
        if records.is_empty() {
            info!(corpus = %self.config.name, documents = documents.len(), "no chunks to embed");
            return Ok(store);
        }

        let vectors = self.embed_in_order(&records).await?;
        for (vector, record) in vectors.iter().zip(records) {
            store.append_pair(vector, record)?;
        }

        info!(
            corpus = %self.config.name,
            documents = documents.len(),
            vectors = store.len(),
            "embedded corpus"
        );
        Ok(store)
    }

    /// Build the corpus and persist both artifacts at the configured paths.
    ///
    /// # Errors
    ///
    /// Everything [`build`](CorpusIndexer::build) returns, plus
    /// [`RagError::BuildIntegrity`] if the artifacts cannot be written.
    pub async fn build_and_persist(&self, documents: &[Document]) -> Result<BuildSummary> {
        let store = self.build(documents).await?;
        store.persist(&self.config.index_path, &self.config.metadata_path)?;
        Ok(BuildSummary { documents: documents.len(), vectors: store.len() })
    }

    async fn embed_in_order(&self, records: &[IndexRecord]) -> Result<Vec<Vec<f32>>> {
        let provider = self.embedding_provider.as_ref();
        let batch_size = self.config.embed_batch_size;
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; records.len()];

        let mut batches = futures::stream::iter(records.chunks(batch_size).enumerate())
            .map(|(batch, chunk)| async move {
                let texts: Vec<&str> = chunk.iter().map(|r| r.text.as_str()).collect();
                (batch, chunk.len(), provider.embed_batch(&texts).await)
            })
            .buffer_unordered(self.config.embed_concurrency);

        while let Some((batch, expected, result)) = batches.next().await {
            let vectors = result.map_err(|e| {
                error!(corpus = %self.config.name, batch, error = %e, "embedding batch failed");
                e
            })?;
            if vectors.len() != expected {
                return Err(RagError::Embedding {
                    provider: provider.name().to_string(),
                    message: format!("batch {batch}: expected {expected} vectors, got {}", vectors.len()),
                });
            }
            let offset = batch * batch_size;
            for (slot, vector) in slots[offset..offset + expected].iter_mut().zip(vectors) {
                *slot = Some(vector);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| {
                slot.ok_or_else(|| {
                    RagError::build_integrity(&self.config.name, format!("chunk {id} was never embedded"))
                })
            })
            .collect()
    }
}

/// Builder for constructing a [`CorpusIndexer`].
#[derive(Default)]
pub struct CorpusIndexerBuilder {
    config: Option<CorpusConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl CorpusIndexerBuilder {
    /// Set the corpus configuration.
    pub fn config(mut self, config: CorpusConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Build the [`CorpusIndexer`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a field is missing, the configuration
    /// is invalid, or the provider's dimension differs from the corpus dimension.
    pub fn build(self) -> Result<CorpusIndexer> {
        let config = self.config.ok_or_else(|| RagError::Config("config is required".to_string()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        config.validate()?;

        if embedding_provider.dimensions() != config.dimension {
            return Err(RagError::Config(format!(
                "corpus '{}' expects dimension {} but provider '{}' produces {}",
                config.name,
                config.dimension,
                embedding_provider.name(),
                embedding_provider.dimensions()
            )));
        }

        let chunker = config.chunking.chunker()?;
        Ok(CorpusIndexer { config, embedding_provider, chunker })
    }
}
