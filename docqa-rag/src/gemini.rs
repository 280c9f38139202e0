//! Gemini embedding and generation providers using the Generative Language
//! REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerativeProvider;

/// The default Generative Language API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

/// The default embedding model.
const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

/// The default generation model.
const DEFAULT_GENERATION_MODEL: &str = "models/gemini-2.0-flash";

/// The dimensionality of `embedding-001`.
const DEFAULT_DIMENSIONS: usize = 768;

/// Most texts accepted by one `batchEmbedContents` request.
const MAX_BATCH_SIZE: usize = 100;

const PROVIDER: &str = "Gemini";

fn api_key_from_env() -> Result<String> {
    std::env::var("GOOGLE_API_KEY")
        .map_err(|_| RagError::service(PROVIDER, "GOOGLE_API_KEY environment variable not set"))
}

fn check_api_key(api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(RagError::service(PROVIDER, "API key must not be empty"));
    }
    Ok(api_key)
}

/// Model names are sent as `models/<name>`.
fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") { model.to_string() } else { format!("models/{model}") }
}

fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') { url.to_string() } else { format!("{url}/") }
}

async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response =
        client.post(url).header("x-goog-api-key", api_key).json(body).send().await.map_err(
            |e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                RagError::service(PROVIDER, format!("request failed: {e}"))
            },
        )?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);

        error!(provider = PROVIDER, %status, "API error");
        return Err(RagError::service(PROVIDER, format!("API returned {status}: {detail}")));
    }

    response.json().await.map_err(|e| {
        error!(provider = PROVIDER, error = %e, "failed to parse response");
        RagError::service(PROVIDER, format!("failed to parse response: {e}"))
    })
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
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
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embedding ───────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini `batchEmbedContents` endpoint.
///
/// # Configuration
///
/// - `model` – defaults to `models/embedding-001`.
/// - `dimensions` – defaults to 768; override when using another model.
/// - `api_key` – from the constructor or the `GOOGLE_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::from_env()?;
/// let vectors = provider.embed(&["hello world"]).await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a new provider with the given API key and the default model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ServiceError`] if the key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: check_api_key(api_key.into())?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Create a new provider using the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the model name, with or without the `models/` prefix.
    pub fn with_model(mut self, model: impl AsRef<str>) -> Self {
        self.model = qualified_model(model.as_ref());
        self
    }

    /// Set the dimensionality the model produces.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Point the provider at another API root.
    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(url.as_ref());
        self
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}{}:batchEmbedContents", self.base_url, self.model);
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.model,
                    content: Content { role: None, parts: vec![Part { text }] },
                })
                .collect(),
        };
        let response: BatchEmbedResponse =
            post_json(&self.client, &url, &self.api_key, &body).await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── Generation ──────────────────────────────────────────────────────

/// A [`GenerativeProvider`] backed by the Gemini `generateContent` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::gemini::GeminiGenerativeProvider;
///
/// let provider = GeminiGenerativeProvider::from_env()?.with_model("gemini-2.0-flash");
/// let text = provider.complete("Say hello").await?;
/// ```
pub struct GeminiGenerativeProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiGenerativeProvider {
    /// Create a new provider with the given API key and the default model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ServiceError`] if the key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: check_api_key(api_key.into())?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
        })
    }

    /// Create a new provider using the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the model name, with or without the `models/` prefix.
    pub fn with_model(mut self, model: impl AsRef<str>) -> Self {
        self.model = qualified_model(model.as_ref());
        self
    }

    /// Point the provider at another API root.
    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(url.as_ref());
        self
    }
}

#[async_trait]
impl GenerativeProvider for GeminiGenerativeProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(provider = PROVIDER, prompt_len = prompt.len(), model = %self.model, "generating");

        let url = format!("{}{}:generateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: prompt }] }],
        };
        let response: GenerateContentResponse =
            post_json(&self.client, &url, &self.api_key, &body).await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            error!(provider = PROVIDER, "response contained no text");
            return Err(RagError::service(PROVIDER, "response contained no text"));
        }
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_are_qualified_once() {
        assert_eq!(qualified_model("embedding-001"), "models/embedding-001");
        assert_eq!(qualified_model("models/embedding-001"), "models/embedding-001");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            GeminiEmbeddingProvider::new(""),
            Err(RagError::ServiceError { .. })
        ));
        assert!(GeminiGenerativeProvider::new("  ").is_err());
    }

    #[test]
    fn batch_request_matches_wire_format() {
        let body = BatchEmbedRequest {
            requests: vec![EmbedContentRequest {
                model: "models/embedding-001",
                content: Content { role: None, parts: vec![Part { text: "hi" }] },
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "requests": [{"model": "models/embedding-001", "content": {"parts": [{"text": "hi"}]}}]
            })
        );
    }

    #[test]
    fn generation_response_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#,
        )
        .unwrap();
        let text: String = response.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(text, "Hello there");
    }
}
