//! Corpus and retrieval configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkPolicy;
use crate::error::{RagError, Result};
use crate::index::Metric;

/// Which knowledge base a corpus holds. Decides how source records become documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CorpusKind {
    /// Diagnosis codes with display names.
    Codes,
    /// Clinical guideline passages.
    Guidelines,
    /// Literature and prior-case abstracts.
    CaseAbstracts,
}

impl CorpusKind {
    /// Default corpus name for this kind.
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Codes => "codes",
            Self::Guidelines => "guidelines",
            Self::CaseAbstracts => "case_abstracts",
        }
    }

    fn default_metric(&self) -> Metric {
        match self {
            Self::Codes => Metric::InnerProduct,
            Self::Guidelines | Self::CaseAbstracts => Metric::L2,
        }
    }

    fn default_chunking(&self) -> ChunkPolicy {
        match self {
            Self::Codes => ChunkPolicy::Whole,
            Self::Guidelines => ChunkPolicy::Words { size: 500, overlap: 50 },
            Self::CaseAbstracts => ChunkPolicy::Words { size: 500, overlap: 0 },
        }
    }
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_embed_concurrency() -> usize {
    4
}

/// Build and serving parameters of one corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusConfig {
    /// Name the corpus is queried by.
    pub name: String,
    /// Knowledge base kind.
    pub kind: CorpusKind,
    /// Similarity metric, fixed at build time.
    pub metric: Metric,
    /// Embedding dimension.
    pub dimension: usize,
    /// Path of the binary index file.
    pub index_path: PathBuf,
    /// Path of the JSON metadata file.
    pub metadata_path: PathBuf,
    /// How documents are split before embedding.
    pub chunking: ChunkPolicy,
    /// Texts per embedding request during a build.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Embedding requests in flight during a build.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
}

impl CorpusConfig {
    /// Start a builder pre-filled with the defaults for `kind`.
    ///
    /// Artifacts default to `<name>.index` / `<name>_metadata.json` in the
    /// working directory; use [`CorpusConfigBuilder::artifact_dir`] to move them.
    pub fn builder(kind: CorpusKind, dimension: usize) -> CorpusConfigBuilder {
        let name = kind.default_name().to_string();
        let (index_path, metadata_path) = artifact_paths(Path::new(""), &name);
        CorpusConfigBuilder {
            config: CorpusConfig {
                name,
                kind,
                metric: kind.default_metric(),
                dimension,
                index_path,
                metadata_path,
                chunking: kind.default_chunking(),
                embed_batch_size: default_embed_batch_size(),
                embed_concurrency: default_embed_concurrency(),
            },
        }
    }

    /// Check that parameters are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RagError::Config("corpus name must not be empty".to_string()));
        }
        if self.dimension == 0 {
            return Err(RagError::Config(format!(
                "corpus '{}': dimension must be greater than zero",
                self.name
            )));
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return Err(RagError::Config(format!(
                "corpus '{}': embed_batch_size and embed_concurrency must be greater than zero",
                self.name
            )));
        }
        if self.index_path == self.metadata_path {
            return Err(RagError::Config(format!(
                "corpus '{}': index and metadata paths must differ",
                self.name
            )));
        }
        self.chunking
            .validate()
            .map_err(|e| RagError::Config(format!("corpus '{}': {e}", self.name)))
    }
}

fn artifact_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (dir.join(format!("{name}.index")), dir.join(format!("{name}_metadata.json")))
}

/// Builder for constructing a validated [`CorpusConfig`].
#[derive(Debug, Clone)]
pub struct CorpusConfigBuilder {
    config: CorpusConfig,
}

impl CorpusConfigBuilder {
    /// Override the corpus name. Artifact file names follow the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let dir = self.config.index_path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.config.name = name.into();
        let (index_path, metadata_path) = artifact_paths(&dir, &self.config.name);
        self.config.index_path = index_path;
        self.config.metadata_path = metadata_path;
        self
    }

    /// Place both artifacts in `dir`.
    pub fn artifact_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let (index_path, metadata_path) = artifact_paths(dir.as_ref(), &self.config.name);
        self.config.index_path = index_path;
        self.config.metadata_path = metadata_path;
        self
    }

    /// Set the index file path.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    /// Set the metadata file path.
    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_path = path.into();
        self
    }

    /// Set the similarity metric.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Set the chunking policy.
    pub fn chunking(mut self, chunking: ChunkPolicy) -> Self {
        self.config.chunking = chunking;
        self
    }

    /// Set the number of texts per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the number of embedding requests in flight.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Build the [`CorpusConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - the name is blank or `dimension == 0`
    /// - batch size or concurrency is zero
    /// - the chunk overlap is not smaller than the chunk size
    pub fn build(self) -> Result<CorpusConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn default_top_k() -> usize {
    5
}

fn default_embed_timeout_secs() -> u64 {
    30
}

/// Query-time parameters of the retrieval service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// `k` used when a caller does not pass one.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Upper bound on one query embedding call.
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_top_k: default_top_k(), embed_timeout_secs: default_embed_timeout_secs() }
    }
}

impl RetrievalConfig {
    /// The embedding timeout as a [`Duration`].
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    /// Check that parameters are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.default_top_k == 0 {
            return Err(RagError::Config("default_top_k must be greater than zero".to_string()));
        }
        if self.embed_timeout_secs == 0 {
            return Err(RagError::Config("embed_timeout_secs must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// All corpora served by one process plus retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    /// Configured corpora.
    pub corpora: Vec<CorpusConfig>,
    /// Retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| RagError::Config(format!("invalid engine configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("cannot read configuration {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    /// Validate every corpus and reject duplicate names.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        let mut seen = HashSet::new();
        for corpus in &self.corpora {
            corpus.validate()?;
            if !seen.insert(corpus.name.as_str()) {
                return Err(RagError::Config(format!("duplicate corpus name '{}'", corpus.name)));
            }
        }
        Ok(())
    }

    /// Look up a corpus by name.
    pub fn corpus(&self, name: &str) -> Option<&CorpusConfig> {
        self.corpora.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_follow_corpus_kind() {
        let codes = CorpusConfig::builder(CorpusKind::Codes, 384).build().unwrap();
        assert_eq!(codes.metric, Metric::InnerProduct);
        assert_eq!(codes.chunking, ChunkPolicy::Whole);
        assert_eq!(codes.index_path, PathBuf::from("codes.index"));

        let guidelines =
            CorpusConfig::builder(CorpusKind::Guidelines, 384).artifact_dir("/data").build().unwrap();
        assert_eq!(guidelines.metric, Metric::L2);
        assert_eq!(guidelines.chunking, ChunkPolicy::Words { size: 500, overlap: 50 });
        assert_eq!(guidelines.metadata_path, PathBuf::from("/data/guidelines_metadata.json"));

        let cases = CorpusConfig::builder(CorpusKind::CaseAbstracts, 384).build().unwrap();
        assert_eq!(cases.chunking, ChunkPolicy::Words { size: 500, overlap: 0 });
    }

    #[test]
    fn renaming_moves_artifacts() {
        let config = CorpusConfig::builder(CorpusKind::Guidelines, 8)
            .artifact_dir("/data")
            .name("who")
            .build()
            .unwrap();
        assert_eq!(config.index_path, PathBuf::from("/data/who.index"));
    }

    #[test]
    fn builder_rejects_invalid_parameters() {
        assert!(CorpusConfig::builder(CorpusKind::Codes, 0).build().is_err());
        assert!(
            CorpusConfig::builder(CorpusKind::Guidelines, 8)
                .chunking(ChunkPolicy::Words { size: 10, overlap: 10 })
                .build()
                .is_err()
        );
        assert!(CorpusConfig::builder(CorpusKind::Codes, 8).embed_batch_size(0).build().is_err());
        assert!(
            CorpusConfig::builder(CorpusKind::Codes, 8)
                .index_path("same")
                .metadata_path("same")
                .build()
                .is_err()
        );
    }

    #[test]
    fn engine_config_from_json() {
        let json = r#"{
            "corpora": [{
                "name": "guidelines",
                "kind": "guidelines",
                "metric": "l2",
                "dimension": 384,
                "index_path": "artifacts/guidelines.index",
                "metadata_path": "artifacts/guidelines_metadata.json",
                "chunking": {"type": "words", "size": 500, "overlap": 50}
            }]
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.retrieval, RetrievalConfig::default());
        let corpus = config.corpus("guidelines").unwrap();
        assert_eq!(corpus.embed_batch_size, 32);
        assert!(config.corpus("codes").is_none());
    }

    #[test]
    fn engine_config_rejects_duplicate_names() {
        let corpus = CorpusConfig::builder(CorpusKind::Codes, 4).build().unwrap();
        let config = EngineConfig { corpora: vec![corpus.clone(), corpus], ..Default::default() };
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }
}
