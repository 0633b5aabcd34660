//! Query-time retrieval over loaded corpora.
//!
//! The [`RetrievalService`] owns a registry of read-only corpora. Queries clone
//! an `Arc` to the corpus they need and release the registry lock before any
//! embedding work, so a rebuild can swap a corpus in while queries against the
//! previous version finish undisturbed.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = RetrievalService::new(Arc::new(embedder), RetrievalConfig::default());
//! service.load_corpus(engine.corpus("guidelines").cloned().unwrap()).await?;
//! let hits = service.query("guidelines", "crushing chest pain with sweating", 5).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{CorpusConfig, EngineConfig, RetrievalConfig};
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::Metric;
use crate::store::AlignedStore;

/// Anything that can answer a top-k query against a named corpus.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return the `k` records closest to `text`, in rank order.
    async fn retrieve(&self, corpus: &str, text: &str, k: usize) -> Result<Vec<SearchResult>>;
}

/// A corpus ready for serving.
#[derive(Debug)]
pub struct LoadedCorpus {
    /// Configuration the corpus was loaded with.
    pub config: CorpusConfig,
    /// Vectors and metadata.
    pub store: AlignedStore,
}

/// Serving status of one configured corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusStatus {
    /// Corpus name.
    pub name: String,
    /// Whether queries are being served.
    pub available: bool,
    /// Number of vectors, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<usize>,
    /// Metric, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    /// Why the corpus is unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Embeds queries and searches loaded corpora.
pub struct RetrievalService {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    corpora: RwLock<HashMap<String, Arc<LoadedCorpus>>>,
    unavailable: RwLock<HashMap<String, String>>,
}

impl RetrievalService {
    /// Create a service with no corpora loaded.
    pub fn new(embedding_provider: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Self {
        Self {
            embedding_provider,
            config,
            corpora: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(HashMap::new()),
        }
    }

    /// Create a service and load every corpus in `engine`.
    ///
    /// Corpora that fail to load are marked unavailable and reported by
    /// [`status`](RetrievalService::status) and by queries against them.
    pub async fn from_engine_config(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        engine: &EngineConfig,
    ) -> Self {
        let service = Self::new(embedding_provider, engine.retrieval.clone());
        for corpus in &engine.corpora {
            // Failures are recorded on the service.
            let _ = service.load_corpus(corpus.clone()).await;
        }
        service
    }

    /// Retrieval settings.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Load a corpus from its artifacts and swap it into the registry.
    ///
    /// If a previous version of the corpus is being served and the new one
    /// fails to load, the previous version keeps serving.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CorpusLoad`] for missing or corrupt artifacts and for
    /// artifacts that disagree with `config` or with the embedding provider.
    pub async fn load_corpus(&self, config: CorpusConfig) -> Result<()> {
        let name = config.name.clone();
        let loaded = config
            .validate()
            .map_err(|e| RagError::corpus_load(&name, e.to_string()))
            .and_then(|()| AlignedStore::load(&name, &config.index_path, &config.metadata_path));

        match loaded {
            Ok(store) => self.install(config, store).await,
            Err(e) => {
                self.record_failure(&name, &e).await;
                Err(e)
            }
        }
    }

    /// Swap an in-memory store into the registry under `config.name`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CorpusLoad`] if the store's metric or dimension
    /// differ from `config`, or the dimension differs from the embedding provider.
    pub async fn install(&self, config: CorpusConfig, store: AlignedStore) -> Result<()> {
        let name = config.name.clone();
        if let Err(e) = self.check_compatible(&config, &store) {
            self.record_failure(&name, &e).await;
            return Err(e);
        }

        let vectors = store.len();
        let corpus = Arc::new(LoadedCorpus { config, store });
        self.corpora.write().await.insert(name.clone(), corpus);
        self.unavailable.write().await.remove(&name);
        info!(corpus = %name, vectors, "corpus loaded");
        Ok(())
    }

    fn check_compatible(&self, config: &CorpusConfig, store: &AlignedStore) -> Result<()> {
        if store.metric() != config.metric {
            return Err(RagError::corpus_load(
                &config.name,
                format!("index metric is {} but configuration says {}", store.metric(), config.metric),
            ));
        }
        if store.dimension() != config.dimension {
            return Err(RagError::corpus_load(
                &config.name,
                format!(
                    "index dimension is {} but configuration says {}",
                    store.dimension(),
                    config.dimension
                ),
            ));
        }
        let provider_dims = self.embedding_provider.dimensions();
        if provider_dims != config.dimension {
            return Err(RagError::corpus_load(
                &config.name,
                format!(
                    "embedding provider '{}' produces dimension {provider_dims}, corpus has {}",
                    self.embedding_provider.name(),
                    config.dimension
                ),
            ));
        }
        Ok(())
    }

    async fn record_failure(&self, name: &str, err: &RagError) {
        error!(corpus = %name, error = %err, "failed to load corpus");
        if self.corpora.read().await.contains_key(name) {
            warn!(corpus = %name, "keeping previously loaded version");
            return;
        }
        self.unavailable.write().await.insert(name.to_string(), err.to_string());
    }

    /// Take a corpus out of service, e.g. after a query-time dimension mismatch.
    pub async fn mark_unavailable(&self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.corpora.write().await.remove(name);
        error!(corpus = %name, reason = %reason, "corpus marked unavailable");
        self.unavailable.write().await.insert(name.to_string(), reason);
    }

    /// Like [`Self::mark_unavailable`], but only while `loaded` is still the
    /// version being served. A corpus swapped in since then stays.
    async fn retire(&self, name: &str, loaded: &Arc<LoadedCorpus>, reason: &str) {
        let mut corpora = self.corpora.write().await;
        match corpora.get(name) {
            Some(current) if Arc::ptr_eq(current, loaded) => {
                corpora.remove(name);
            }
            _ => {
                warn!(corpus = %name, reason, "corpus was replaced during the query, not retiring it");
                return;
            }
        }
        error!(corpus = %name, reason, "corpus marked unavailable");
        self.unavailable.write().await.insert(name.to_string(), reason.to_string());
    }

    /// A handle to a loaded corpus.
    pub async fn corpus(&self, name: &str) -> Option<Arc<LoadedCorpus>> {
        self.corpora.read().await.get(name).cloned()
    }

    /// Names of the corpora currently served, sorted.
    pub async fn corpus_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.corpora.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every known corpus, sorted by name.
    pub async fn status(&self) -> Vec<CorpusStatus> {
        let mut statuses: Vec<CorpusStatus> = self
            .corpora
            .read()
            .await
            .values()
            .map(|c| CorpusStatus {
                name: c.config.name.clone(),
                available: true,
                vectors: Some(c.store.len()),
                metric: Some(c.store.metric()),
                reason: None,
            })
            .collect();
        statuses.extend(self.unavailable.read().await.iter().map(|(name, reason)| CorpusStatus {
            name: name.clone(),
            available: false,
            vectors: None,
            metric: None,
            reason: Some(reason.clone()),
        }));
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Embed `text` and return the `k` nearest records of `corpus` in rank order.
    ///
    /// `k` larger than the corpus is clamped to the population.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for blank text, `k == 0`, or an unknown corpus
    /// - [`RagError::CorpusLoad`] if the corpus is unavailable or the query
    ///   embedding does not match the index dimension
    /// - [`RagError::Embedding`] if the provider fails or exceeds the timeout
    pub async fn query(&self, corpus: &str, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        if text.trim().is_empty() {
            return Err(RagError::Validation("query text must not be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::Validation("k must be a positive integer".to_string()));
        }

        let loaded = match self.corpus(corpus).await {
            Some(loaded) => loaded,
            None => {
                return Err(match self.unavailable.read().await.get(corpus) {
                    Some(reason) => RagError::corpus_load(corpus, reason.clone()),
                    None => RagError::Validation(format!("unknown corpus '{corpus}'")),
                });
            }
        };

        let timeout = self.config.embed_timeout();
        let embedding = tokio::time::timeout(timeout, self.embedding_provider.embed(text))
            .await
            .map_err(|_| RagError::Embedding {
                provider: self.embedding_provider.name().to_string(),
                message: format!("query embedding timed out after {}s", timeout.as_secs()),
            })??;

        if embedding.len() != loaded.store.dimension() {
            let reason = format!(
                "query embedding has dimension {} but index has {}",
                embedding.len(),
                loaded.store.dimension()
            );
            self.retire(corpus, &loaded, &reason).await;
            return Err(RagError::corpus_load(corpus, reason));
        }

        let k = k.min(loaded.store.len());
        let results = loaded.store.search(&embedding, k)?;
        debug!(corpus, k, result_count = results.len(), "query completed");
        Ok(results)
    }
}

#[async_trait]
impl Retriever for RetrievalService {
    async fn retrieve(&self, corpus: &str, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.query(corpus, text, k).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::config::CorpusKind;
    use crate::document::{Attributes, IndexRecord};

    struct AxisProvider {
        dims: usize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut v = vec![0.0; self.dims];
            v[text.len() % self.dims] = 1.0;
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    /// Signals when an embedding starts, then waits for a release and returns
    /// one component too many.
    struct HeldProvider {
        dims: usize,
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EmbeddingProvider for HeldProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec![0.0; self.dims + 1])
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    fn store(name: &str, dims: usize, n: usize) -> AlignedStore {
        let mut store = AlignedStore::new(name, Metric::InnerProduct, dims).unwrap();
        for i in 0..n {
            let mut v = vec![0.0; dims];
            v[i % dims] = 1.0;
            let record = IndexRecord {
                document_id: format!("d{i}"),
                chunk_ordinal: 0,
                text: format!("doc {i}"),
                attributes: Attributes::new(),
            };
            store.append_pair(&v, record).unwrap();
        }
        store
    }

    fn config(dims: usize) -> CorpusConfig {
        CorpusConfig::builder(CorpusKind::Codes, dims).build().unwrap()
    }

    fn service(dims: usize) -> RetrievalService {
        RetrievalService::new(Arc::new(AxisProvider { dims, delay: None }), RetrievalConfig::default())
    }

    #[tokio::test]
    async fn rejects_invalid_queries_before_embedding() {
        let service = service(4);
        service.install(config(4), store("codes", 4, 3)).await.unwrap();

        assert!(matches!(service.query("codes", "  ", 1).await, Err(RagError::Validation(_))));
        assert!(matches!(service.query("codes", "abc", 0).await, Err(RagError::Validation(_))));
        assert!(matches!(service.query("nope", "abc", 1).await, Err(RagError::Validation(_))));
    }

    #[tokio::test]
    async fn k_is_clamped_to_population() {
        let service = service(4);
        service.install(config(4), store("codes", 4, 3)).await.unwrap();
        let hits = service.query("codes", "a", 50).await.unwrap();
        assert_eq!(hits.len(), 3);
        // "a" has length 1, so axis 1 (d1) is the exact match.
        assert_eq!(hits[0].record.document_id, "d1");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn install_rejects_provider_dimension_mismatch() {
        let service = service(8);
        let err = service.install(config(4), store("codes", 4, 2)).await.unwrap_err();
        assert!(matches!(err, RagError::CorpusLoad { .. }));
        let status = service.status().await;
        assert_eq!(status.len(), 1);
        assert!(!status[0].available);

        let err = service.query("codes", "abc", 1).await.unwrap_err();
        assert!(matches!(err, RagError::CorpusLoad { ref corpus, .. } if corpus == "codes"));
    }

    #[tokio::test]
    async fn failed_reload_keeps_serving_previous_version() {
        let service = service(4);
        service.install(config(4), store("codes", 4, 2)).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let missing = CorpusConfig::builder(CorpusKind::Codes, 4).artifact_dir(dir.path()).build().unwrap();
        assert!(service.load_corpus(missing).await.is_err());

        assert_eq!(service.corpus_names().await, vec!["codes".to_string()]);
        assert!(service.query("codes", "abc", 1).await.is_ok());
    }

    #[tokio::test]
    async fn swap_replaces_loaded_corpus() {
        let service = service(4);
        service.install(config(4), store("codes", 4, 2)).await.unwrap();
        let old = service.corpus("codes").await.unwrap();
        service.install(config(4), store("codes", 4, 4)).await.unwrap();

        assert_eq!(old.store.len(), 2);
        assert_eq!(service.corpus("codes").await.unwrap().store.len(), 4);
    }

    #[tokio::test]
    async fn dimension_mismatch_spares_a_corpus_swapped_in_mid_query() {
        let provider = Arc::new(HeldProvider { dims: 4, started: Notify::new(), release: Notify::new() });
        let service = Arc::new(RetrievalService::new(provider.clone(), RetrievalConfig::default()));
        service.install(config(4), store("codes", 4, 2)).await.unwrap();

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.query("codes", "abc", 1).await }
        });
        provider.started.notified().await;
        service.install(config(4), store("codes", 4, 4)).await.unwrap();
        provider.release.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RagError::CorpusLoad { .. }));
        assert_eq!(service.corpus("codes").await.unwrap().store.len(), 4);
        assert!(service.status().await.iter().all(|s| s.available));

        // Without a swap the mismatching corpus is taken out of service.
        provider.release.notify_one();
        assert!(service.query("codes", "abc", 1).await.is_err());
        assert!(service.corpus("codes").await.is_none());
        assert!(!service.status().await[0].available);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedding_times_out() {
        let service = RetrievalService::new(
            Arc::new(AxisProvider { dims: 4, delay: Some(Duration::from_secs(120)) }),
            RetrievalConfig { embed_timeout_secs: 1, ..Default::default() },
        );
        service.install(config(4), store("codes", 4, 2)).await.unwrap();
        let err = service.query("codes", "abc", 1).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }

    #[tokio::test]
    async fn loads_persisted_corpus_from_engine_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CorpusConfig::builder(CorpusKind::Codes, 4).artifact_dir(dir.path()).build().unwrap();
        store("codes", 4, 3).persist(&cfg.index_path, &cfg.metadata_path).unwrap();

        let broken = CorpusConfig::builder(CorpusKind::Guidelines, 4)
            .artifact_dir(dir.path().join("missing"))
            .build()
            .unwrap();
        let engine = EngineConfig { corpora: vec![cfg, broken], retrieval: RetrievalConfig::default() };
        let service =
            RetrievalService::from_engine_config(Arc::new(AxisProvider { dims: 4, delay: None }), &engine).await;

        let status = service.status().await;
        assert_eq!(status.iter().map(|s| (s.name.as_str(), s.available)).collect::<Vec<_>>(), vec![
            ("codes", true),
            ("guidelines", false)
        ]);
        assert_eq!(service.retrieve("codes", "abc", 2).await.unwrap().len(), 2);
    }
}
