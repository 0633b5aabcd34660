//! Build → persist → load → query, with a stub embedding provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use medrag_retrieval::{
    ChunkPolicy, CodeDetail, CodeRecord, CorpusConfig, CorpusIndexer, CorpusKind, Document,
    EmbeddingProvider, EngineConfig, Metric, RagError, Result, RetrievalConfig, RetrievalService,
    StaticDetailLookup, TextRecord, build_code_corpus, build_text_corpus,
};

/// Maps known phrases to hand-picked vectors. "chest discomfort" sits next to
/// "chest pain"; unknown text lands on the last axis.
struct PhraseEmbedder;

#[async_trait]
impl EmbeddingProvider for PhraseEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let v = match text {
            "fever and cough" => vec![1.0, 0.0, 0.0, 0.0],
            "chest pain" => vec![0.0, 1.0, 0.0, 0.0],
            "headache and nausea" => vec![0.0, 0.0, 1.0, 0.0],
            "chest discomfort" => vec![0.1, 0.9, 0.1, 0.0],
            _ => vec![0.0, 0.0, 0.0, 1.0],
        };
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn name(&self) -> &str {
        "phrase-stub"
    }
}

fn three_documents() -> Vec<Document> {
    vec![
        Document::new("A1", "fever and cough"),
        Document::new("A2", "chest pain"),
        Document::new("A3", "headache and nausea"),
    ]
}

#[tokio::test]
async fn inner_product_corpus_returns_closest_document() {
    let dir = tempfile::tempdir().unwrap();
    let config = CorpusConfig::builder(CorpusKind::Guidelines, 4)
        .name("scenario")
        .artifact_dir(dir.path())
        .metric(Metric::InnerProduct)
        .chunking(ChunkPolicy::Words { size: 10, overlap: 0 })
        .build()
        .unwrap();

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(PhraseEmbedder);
    let indexer =
        CorpusIndexer::builder().config(config.clone()).embedding_provider(provider.clone()).build().unwrap();
    let summary = indexer.build_and_persist(&three_documents()).await.unwrap();
    assert_eq!(summary.vectors, 3);

    let service = RetrievalService::new(provider, RetrievalConfig::default());
    service.load_corpus(config).await.unwrap();

    let hits = service.query("scenario", "chest discomfort", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.document_id, "A2");
    assert_eq!(hits[0].record.text, "chest pain");
    assert!(hits[0].score > 0.9);

    let all = service.query("scenario", "chest discomfort", 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn l2_corpus_ranks_by_ascending_distance() {
    let dir = tempfile::tempdir().unwrap();
    let config = CorpusConfig::builder(CorpusKind::CaseAbstracts, 4)
        .artifact_dir(dir.path())
        .chunking(ChunkPolicy::Words { size: 10, overlap: 0 })
        .build()
        .unwrap();
    assert_eq!(config.metric, Metric::L2);

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(PhraseEmbedder);
    CorpusIndexer::builder()
        .config(config.clone())
        .embedding_provider(provider.clone())
        .build()
        .unwrap()
        .build_and_persist(&three_documents())
        .await
        .unwrap();

    let service = RetrievalService::new(provider, RetrievalConfig::default());
    service.load_corpus(config).await.unwrap();
    let hits = service.query("case_abstracts", "chest discomfort", 3).await.unwrap();
    assert_eq!(hits[0].record.document_id, "A2");
    assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
}

#[tokio::test]
async fn persisted_artifacts_stay_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let config = CorpusConfig::builder(CorpusKind::Guidelines, 4)
        .artifact_dir(dir.path())
        .chunking(ChunkPolicy::Words { size: 2, overlap: 1 })
        .build()
        .unwrap();

    let corpus = build_text_corpus(vec![
        Ok(TextRecord::guideline("stroke.pdf", "give aspirin early")),
        Ok(TextRecord::guideline("sepsis.pdf", "start fluids")),
    ]);
    CorpusIndexer::builder()
        .config(config.clone())
        .embedding_provider(Arc::new(PhraseEmbedder))
        .build()
        .unwrap()
        .build_and_persist(&corpus.documents)
        .await
        .unwrap();

    let metadata: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&config.metadata_path).unwrap()).unwrap();
    let texts: Vec<&str> = metadata.iter().map(|m| m["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["give aspirin", "aspirin early", "start fluids"]);
    assert_eq!(metadata[1]["chunk_ordinal"], 1);
    assert_eq!(metadata[2]["source"], "sepsis.pdf");

    let store: medrag_retrieval::AlignedStore =
        medrag_retrieval::AlignedStore::load("guidelines", &config.index_path, &config.metadata_path).unwrap();
    assert_eq!(store.len(), metadata.len());
}

#[tokio::test]
async fn code_corpus_from_enriched_records() {
    let dir = tempfile::tempdir().unwrap();
    let lookup = StaticDetailLookup::new(HashMap::from([(
        "R07.9".to_string(),
        CodeDetail { description: "Chest pain, unspecified".into(), ..Default::default() },
    )]));
    let corpus = build_code_corpus(
        vec![
            Ok(CodeRecord { code: "R07.9".into(), name: "Chest pain".into() }),
            Ok(CodeRecord { code: "R07.9".into(), name: "Thoracic pain".into() }),
            Err(RagError::Validation("line 3: not a JSON object".into())),
            Ok(CodeRecord { code: "R51".into(), name: "Headache".into() }),
        ],
        Some(&lookup),
    )
    .await;
    assert_eq!(corpus.stats.accepted, 2);
    assert_eq!(corpus.stats.duplicates, 1);
    assert_eq!(corpus.stats.skipped, 1);

    let config = CorpusConfig::builder(CorpusKind::Codes, 4).artifact_dir(dir.path()).build().unwrap();
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(PhraseEmbedder);
    CorpusIndexer::builder()
        .config(config.clone())
        .embedding_provider(provider.clone())
        .build()
        .unwrap()
        .build_and_persist(&corpus.documents)
        .await
        .unwrap();

    let engine = EngineConfig { corpora: vec![config], retrieval: RetrievalConfig::default() };
    let service = RetrievalService::from_engine_config(provider, &engine).await;
    let hits = service.query("codes", "anything", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
    let chest = hits.iter().find(|h| h.record.document_id == "R07.9").unwrap();
    assert_eq!(chest.record.attribute("source"), Some("code_table+detail"));
    assert_eq!(chest.record.text, "R07.9 Chest pain. Chest pain, unspecified");
}

#[tokio::test]
async fn mismatched_provider_is_a_load_error() {
    struct WideEmbedder;

    #[async_trait]
    impl EmbeddingProvider for WideEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let config = CorpusConfig::builder(CorpusKind::Codes, 4).artifact_dir(dir.path()).build().unwrap();
    CorpusIndexer::builder()
        .config(config.clone())
        .embedding_provider(Arc::new(PhraseEmbedder))
        .build()
        .unwrap()
        .build_and_persist(&three_documents())
        .await
        .unwrap();

    let service = RetrievalService::new(Arc::new(WideEmbedder), RetrievalConfig::default());
    let err = service.load_corpus(config).await.unwrap_err();
    assert!(matches!(err, RagError::CorpusLoad { ref corpus, .. } if corpus == "codes"));
    assert!(matches!(service.query("codes", "x", 1).await, Err(RagError::CorpusLoad { .. })));
}
