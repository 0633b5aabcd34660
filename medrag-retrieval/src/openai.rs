//! Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
//!
//! Works against the hosted OpenAI API as well as self-hosted servers that
//! expose the same route for sentence-transformer models (text-embeddings-inference,
//! vLLM, Ollama). This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Default base URL; the provider appends `/embeddings`.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";

/// Default model, a 384-dimension sentence-transformer.
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Dimension of [`DEFAULT_MODEL`].
pub const DEFAULT_DIMENSIONS: usize = 384;

const PROVIDER: &str = "openai-compatible";

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// # Configuration
///
/// - `base_url` – defaults to [`DEFAULT_BASE_URL`], or `MEDRAG_EMBEDDINGS_URL` via [`from_env`](Self::from_env).
/// - `model` – defaults to [`DEFAULT_MODEL`], or `MEDRAG_EMBEDDINGS_MODEL`.
/// - `api_key` – optional bearer token, `MEDRAG_EMBEDDINGS_API_KEY`.
/// - `dimensions` – expected output size; responses of any other size are rejected.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_retrieval::openai::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::new("http://embeddings:8080/v1")?
///     .with_model("BAAI/bge-small-en-v1.5")
///     .with_dimensions(384);
/// let embedding = provider.embed("productive cough for three weeks").await?;
/// ```
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider for the API rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(RagError::Config("embeddings base URL must not be empty".into()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{base_url}/embeddings"),
            api_key: None,
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Create a provider from `MEDRAG_EMBEDDINGS_URL`, `MEDRAG_EMBEDDINGS_MODEL`
    /// and `MEDRAG_EMBEDDINGS_API_KEY`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("MEDRAG_EMBEDDINGS_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut provider = Self::new(base_url)?;
        if let Ok(model) = std::env::var("MEDRAG_EMBEDDINGS_MODEL") {
            provider = provider.with_model(model);
        }
        if let Ok(key) = std::env::var("MEDRAG_EMBEDDINGS_API_KEY") {
            provider = provider.with_api_key(key);
        }
        Ok(provider)
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a bearer token. An empty key is ignored.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    /// Set the expected output dimension.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self
    }

    /// The model name sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn failure(message: impl Into<String>) -> RagError {
        RagError::Embedding { provider: PROVIDER.into(), message: message.into() }
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| Self::failure("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body = EmbeddingRequest { model: &self.model, input: texts.to_vec() };
        let mut request = self.client.post(&self.endpoint).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "request failed");
            Self::failure(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(Self::failure(format!("API returned {status}: {detail}")));
        }

        let mut embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            Self::failure(format!("failed to parse response: {e}"))
        })?;

        // Servers may return items out of input order; `index` is authoritative when present.
        embedding_response.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        if embedding_response.data.len() != texts.len() {
            return Err(Self::failure(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embedding_response.data.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = embedding_response.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(RagError::DimensionMismatch { expected: self.dimensions, actual: bad.len() });
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
