//! Gemini collaborator using the `generateContent` REST endpoint.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::collaborator::{Collaborator, TurnContext, render_prompt};
use crate::error::{Result, SessionError};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default generation model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const NAME: &str = "gemini";

/// A [`Collaborator`] that sends the elicitation prompt to Gemini.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_session::gemini::GeminiCollaborator;
///
/// let collaborator = GeminiCollaborator::from_env()?.with_model("gemini-2.0-flash");
/// ```
pub struct GeminiCollaborator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiCollaborator {
    /// Create a collaborator with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(failure("API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
        })
    }

    /// Create a collaborator using the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| failure("GEMINI_API_KEY environment variable not set"))?;
        Self::new(api_key)
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the collaborator at another API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn failure(message: impl Into<String>) -> SessionError {
    SessionError::Collaborator { collaborator: NAME.into(), message: message.into() }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// ── Collaborator implementation ────────────────────────────────────

#[async_trait]
impl Collaborator for GeminiCollaborator {
    async fn propose(&self, ctx: &TurnContext<'_>) -> Result<String> {
        let prompt = render_prompt(ctx);
        debug!(session_id = ctx.session_id, model = %self.model, prompt_len = prompt.len(), "calling gemini");

        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts: vec![RequestPart { text: &prompt }] }],
            generation_config: GenerationConfig { response_mime_type: "application/json" },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(session_id = ctx.session_id, error = %e, "gemini request failed");
                failure(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(session_id = ctx.session_id, %status, "gemini API error");
            return Err(failure(format!("API returned {status}: {detail}")));
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| failure(format!("failed to parse response: {e}")))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        // An empty answer is a parse failure, so it goes through the retry path.
        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        NAME
    }
}
