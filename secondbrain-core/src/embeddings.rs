//! Embeddings module: turns text into fixed-length vectors
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **OpenAI**: `POST /embeddings` on any OpenAI-compatible API (1536-dim for ada-002)
//! - **Hashing**: local bag-of-words feature hashing, no network (dev and tests)
//!
//! Provider failures are returned to the caller as-is. There is no retry layer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingSettings;

/// Dimensions of `text-embedding-ada-002`
pub const OPENAI_ADA_DIMENSIONS: usize = 1536;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts, one vector per input in input order.
    /// Defaults to calling `embed()` for each input.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Returns the embedding dimension (e.g., 1536).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Embed a user query. Newlines are flattened to spaces first.
pub async fn generate_embedding(
    backend: &dyn EmbeddingBackend,
    value: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    let input = value.replace('\n', " ");
    backend.embed(&input).await
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Invalid response: expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

// ============================================================================
// Config types
// ============================================================================

/// OpenAI embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
        }
    }
}

/// Create the backend named by `[embedding] backend`.
pub fn create_backend(
    settings: &EmbeddingSettings,
) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    let dimensions = settings.dimensions as usize;
    match settings.backend.as_str() {
        "openai" => {
            let config = EmbeddingConfig::new(None, settings.model.clone(), dimensions);
            Ok(Box::new(OpenAiEmbeddingClient::with_base_url(
                config,
                settings.base_url.clone(),
            )?))
        }
        "hashing" => Ok(Box::new(HashingEmbeddingClient::new(dimensions))),
        other => Err(EmbeddingError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: Option<OpenAiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiEmbeddingClient
// ============================================================================

/// OpenAI embedding client: calls the `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, "https://api.openai.com/v1".to_string())
    }

    /// Create a client with a custom base URL (for testing / compatible providers)
    pub fn with_base_url(
        config: EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAiRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Embedding API error");

            return Err(EmbeddingError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let mut body: OpenAiResponse = response.json().await?;

        if body.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: body.data.len(),
            });
        }

        body.data.sort_by_key(|e| e.index);

        let mut vectors = Vec::with_capacity(body.data.len());
        for item in body.data {
            if item.embedding.len() != self.config.dimensions {
                return Err(EmbeddingError::InvalidDimensions {
                    expected: self.config.dimensions,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }

        tracing::debug!(count = vectors.len(), model = %self.config.model, "Embedded batch");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// HashingEmbeddingClient
// ============================================================================

/// Offline backend: each lowercase word is hashed (FNV-1a) into one bucket and
/// the bucket counts are L2-normalised. Texts sharing words score high.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingClient {
    dimensions: usize,
}

impl HashingEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingBackend for HashingEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Cosine similarity in f64. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

// ============================================================================
// TESTS
// ============================================================================
