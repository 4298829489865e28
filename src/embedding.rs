//! Embedding clients and provider selection.
//!
//! Defines the [`EmbeddingClient`] trait and its implementations:
//! - **[`MockEmbeddingClient`]**: deterministic, offline, unit-norm vectors.
//! - **[`OpenAiEmbeddingClient`]**: `POST {base}/embeddings`, one batched call.
//! - **[`GeminiEmbeddingClient`]**: `POST {base}/models/{model}:embedContent`,
//!   one call per input text.
//!
//! Use [`create_embedding_client`] to build the client named by the
//! configuration. It fails with [`KbError::NotConfigured`] before any
//! network activity when AI is disabled, the provider cannot embed, or the
//! provider's key is missing.
//!
//! Clients return raw vectors; dimension fitting and audit logging happen
//! in [`EmbeddingOrchestrator`](crate::orchestrator::EmbeddingOrchestrator).

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use teamkb_core::embedding::l2_normalize;

use crate::config::{AiConfig, EMBEDDING_PROVIDERS};
use crate::error::{KbError, KbResult};
use crate::provider::{http_client, parse_vector, send_json, usage_i64};

/// Raw vectors returned by a provider, in input order.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOutput {
    pub vectors: Vec<Vec<f32>>,
    /// Provider-reported token usage, when available.
    pub total_tokens: Option<i64>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Provider name as recorded in audit entries (e.g. `"openai"`).
    fn provider_name(&self) -> &str;
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput>;
}

// ============ Mock ============

/// Offline embedding client.
///
/// Each vector is seeded from the SHA-256 of its text plus its batch
/// position, filled with uniform values in `[-1, 1]`, and L2-normalized.
/// Identical `(text, position)` pairs always yield identical vectors.
pub struct MockEmbeddingClient {
    dims: usize,
}

impl MockEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str, position: usize) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let seed = u64::from_le_bytes(seed_bytes).wrapping_add(position as u64);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut vec: Vec<f32> = (0..self.dims)
            .map(|_| rng.gen_range(-1.0f64..=1.0) as f32)
            .collect();
        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput> {
        let vectors = texts
            .iter()
            .enumerate()
            .map(|(i, t)| self.vector_for(t, i))
            .collect();
        let total: usize = texts.iter().map(|t| t.chars().count() / 4).sum();
        Ok(EmbeddingOutput {
            vectors,
            total_tokens: Some(total as i64),
        })
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(http: reqwest::Client, key: String, model: String, base_url: String) -> Self {
        Self {
            http,
            key,
            model,
            base_url,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput> {
        if texts.is_empty() {
            return Ok(EmbeddingOutput::default());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.key)
            .json(&body);
        let raw = send_json("openai", request).await?;

        parse_openai_response(&raw)
    }
}

/// Extract `data[].embedding` in `index` order, plus `usage.total_tokens`.
fn parse_openai_response(raw: &serde_json::Value) -> KbResult<EmbeddingOutput> {
    let data = raw
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| KbError::provider("openai", "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = parse_vector(item.get("embedding"))
            .ok_or_else(|| KbError::provider("openai", "invalid response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(EmbeddingOutput {
        vectors: indexed.into_iter().map(|(_, v)| v).collect(),
        total_tokens: usage_i64(raw, "/usage/total_tokens"),
    })
}

// ============ Gemini ============

pub struct GeminiEmbeddingClient {
    http: reqwest::Client,
    key: String,
    model: String,
    base_url: String,
    dims: usize,
}

impl GeminiEmbeddingClient {
    pub fn new(
        http: reqwest::Client,
        key: String,
        model: String,
        base_url: String,
        dims: usize,
    ) -> Self {
        Self {
            http,
            key,
            model,
            base_url,
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingClient for GeminiEmbeddingClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let body = serde_json::json!({
                "model": format!("models/{}", self.model),
                "content": { "parts": [{ "text": text }] },
                "output_dimensionality": self.dims,
            });
            let request = self
                .http
                .post(format!(
                    "{}/models/{}:embedContent",
                    self.base_url, self.model
                ))
                .header("x-goog-api-key", &self.key)
                .json(&body);
            let raw = send_json("gemini", request).await?;

            let vec = parse_vector(raw.pointer("/embedding/values")).ok_or_else(|| {
                KbError::provider("gemini", "invalid response: missing embedding.values")
            })?;
            vectors.push(vec);
        }

        Ok(EmbeddingOutput {
            vectors,
            total_tokens: None,
        })
    }
}

// ============ Selection ============

/// Check that embeddings can be served with the current configuration.
pub fn check_embedding_config(ai: &AiConfig) -> KbResult<()> {
    if !ai.enabled {
        return Err(KbError::ai_disabled());
    }
    let provider = ai.embedding_provider_name();
    if !EMBEDDING_PROVIDERS.contains(&provider) {
        return Err(KbError::NotConfigured(format!(
            "Embeddings not supported for provider: {}. Use mock, openai, or gemini for RAG embeddings.",
            provider
        )));
    }
    if provider != "mock" && ai.api_key(provider).is_none() {
        return Err(KbError::missing_api_key(provider));
    }
    Ok(())
}

/// Build the embedding client named by `ai.embedding_provider` (or
/// `ai.provider`).
pub fn create_embedding_client(ai: &AiConfig) -> KbResult<Arc<dyn EmbeddingClient>> {
    check_embedding_config(ai)?;
    let provider = ai.embedding_provider_name();
    let key = ai.api_key(provider).unwrap_or_default().to_string();

    match provider {
        "mock" => Ok(Arc::new(MockEmbeddingClient::new(ai.embedding_dimension))),
        "openai" => Ok(Arc::new(OpenAiEmbeddingClient::new(
            http_client(provider, ai.timeout_secs)?,
            key,
            ai.embedding_model(provider),
            ai.base_url(provider),
        ))),
        "gemini" => Ok(Arc::new(GeminiEmbeddingClient::new(
            http_client(provider, ai.timeout_secs)?,
            key,
            ai.embedding_model(provider),
            ai.base_url(provider),
            ai.embedding_dimension,
        ))),
        other => Err(KbError::NotConfigured(format!(
            "Embeddings not supported for provider: {}.",
            other
        ))),
    }
}
