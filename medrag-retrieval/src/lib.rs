//! Semantic retrieval engine for clinical knowledge bases.
//!
//! This crate provides:
//! - Source records to deduplicated documents ([`CorpusBuilder`])
//! - Word-window chunking ([`Chunker`], [`ChunkPolicy`])
//! - Exact vector indexes with L2 and cosine metrics ([`FlatIndex`])
//! - Index + metadata pairs that cannot drift apart ([`AlignedStore`])
//! - A concurrent, order-preserving build pipeline ([`CorpusIndexer`])
//! - Top-k query serving over hot-swappable corpora ([`RetrievalService`])
//!
//! # Features
//!
//! - `openai` – [`openai::OpenAiEmbeddingProvider`] for OpenAI-compatible embeddings endpoints

pub mod chunking;
pub mod config;
pub mod corpus;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod indexer;
pub mod metadata;
pub mod retrieval;
pub mod store;
pub mod vector;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{ChunkPolicy, Chunker, WholeDocumentChunker, WordWindowChunker, chunk_words};
pub use config::{CorpusConfig, CorpusConfigBuilder, CorpusKind, EngineConfig, RetrievalConfig};
pub use corpus::{
    BuildStats, BuiltCorpus, CodeDetail, CodeRecord, CorpusBuilder, DetailLookup,
    StaticDetailLookup, TextRecord, build_code_corpus, build_text_corpus,
};
pub use document::{Attributes, Chunk, Document, IndexRecord, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use index::{FlatIndex, Metric, Neighbor, PersistentIndex, VectorIndex};
pub use indexer::{BuildSummary, CorpusIndexer, CorpusIndexerBuilder};
pub use metadata::MetadataStore;
pub use retrieval::{CorpusStatus, LoadedCorpus, RetrievalService, Retriever};
pub use store::AlignedStore;
