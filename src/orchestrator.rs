//! Provider selection, auditing, and normalization around AI calls.
//!
//! [`EmbeddingOrchestrator`] and [`ChatOrchestrator`] are the only callers
//! of provider clients. Each call that reaches a provider produces exactly
//! one audit entry; configuration failures are raised before any client is
//! built and leave no audit trace.

use std::sync::Arc;
use std::time::Instant;

use teamkb_core::embedding::{approx_tokens, fit_dimension};
use teamkb_core::store::Store;

use crate::audit::{embedding_payload, AuditContext, AuditLogger, EmbeddingAudit};
use crate::chat::{check_chat_config, create_chat_client, ChatClient, ChatRequest, ChatResponse};
use crate::config::AiConfig;
use crate::embedding::{check_embedding_config, create_embedding_client, EmbeddingClient};
use crate::error::KbResult;

/// Vectors for one batch, fitted to the configured dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: Option<i64>,
    pub latency_ms: i64,
    pub provider: String,
    pub model: String,
}

pub struct EmbeddingOrchestrator {
    ai: AiConfig,
    audit: AuditLogger,
    client: Option<Arc<dyn EmbeddingClient>>,
}

impl EmbeddingOrchestrator {
    pub fn new(ai: AiConfig, store: Arc<dyn Store>) -> Self {
        Self {
            ai,
            audit: AuditLogger::new(store),
            client: None,
        }
    }

    /// Use `client` instead of the one named by the configuration.
    pub fn with_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some() || check_embedding_config(&self.ai).is_ok()
    }

    /// Fails with `NotConfigured` when embeddings cannot be served.
    pub fn ensure_configured(&self) -> KbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        check_embedding_config(&self.ai)
    }

    fn client(&self) -> KbResult<Arc<dyn EmbeddingClient>> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => create_embedding_client(&self.ai),
        }
    }

    pub async fn embed(&self, texts: &[String], ctx: &AuditContext) -> KbResult<EmbeddingResult> {
        let client = self.client()?;
        let provider = client.provider_name().to_string();
        let model = client.model_name().to_string();
        let request_payload = embedding_payload(&model, texts);

        if texts.is_empty() {
            let outcome = EmbeddingAudit {
                embedding_count: 0,
                dimensions: 0,
                total_tokens: Some(0),
                latency_ms: 0,
            };
            self.audit
                .embedding_success(ctx, &provider, &model, request_payload, &outcome)
                .await?;
            return Ok(EmbeddingResult {
                vectors: Vec::new(),
                total_tokens: Some(0),
                latency_ms: 0,
                provider,
                model,
            });
        }

        let started = Instant::now();
        let output = match client.embed(texts).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(provider = %provider, model = %model, error = %e, "embedding call failed");
                self.audit
                    .embedding_error(ctx, &provider, &model, request_payload, &e)
                    .await;
                return Err(e);
            }
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        let dims = self.ai.embedding_dimension;
        let vectors: Vec<Vec<f32>> = output
            .vectors
            .into_iter()
            .map(|v| fit_dimension(v, dims))
            .collect();
        let total_tokens = output
            .total_tokens
            .or_else(|| Some(approx_tokens(texts)));

        let outcome = EmbeddingAudit {
            embedding_count: vectors.len(),
            dimensions: vectors.first().map(|v| v.len()).unwrap_or(0),
            total_tokens,
            latency_ms,
        };
        self.audit
            .embedding_success(ctx, &provider, &model, request_payload, &outcome)
            .await?;

        tracing::debug!(provider = %provider, count = vectors.len(), latency_ms, "embedded batch");
        Ok(EmbeddingResult {
            vectors,
            total_tokens,
            latency_ms,
            provider,
            model,
        })
    }
}

/// A chat completion with the provider and model that produced it.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub response: ChatResponse,
    pub latency_ms: i64,
    pub provider: String,
    pub model: String,
}

pub struct ChatOrchestrator {
    ai: AiConfig,
    audit: AuditLogger,
    client: Option<Arc<dyn ChatClient>>,
}

impl ChatOrchestrator {
    pub fn new(ai: AiConfig, store: Arc<dyn Store>) -> Self {
        Self {
            ai,
            audit: AuditLogger::new(store),
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some() || check_chat_config(&self.ai).is_ok()
    }

    /// Fails with `NotConfigured` when chat cannot be served.
    pub fn ensure_configured(&self) -> KbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        check_chat_config(&self.ai)
    }

    pub fn provider_name(&self) -> String {
        match &self.client {
            Some(client) => client.provider_name().to_string(),
            None => self.ai.provider.clone(),
        }
    }

    pub fn default_model(&self) -> String {
        self.ai.chat_model(&self.provider_name())
    }

    pub fn temperature(&self) -> f32 {
        self.ai.temperature
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.ai.max_output_tokens
    }

    fn client(&self) -> KbResult<Arc<dyn ChatClient>> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => create_chat_client(&self.ai),
        }
    }

    pub async fn complete(&self, request: &ChatRequest, ctx: &AuditContext) -> KbResult<ChatResult> {
        let client = self.client()?;
        let provider = client.provider_name().to_string();

        let started = Instant::now();
        let response = match client.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = %provider, model = %request.model, error = %e, "chat call failed");
                self.audit.chat_error(ctx, &provider, request, &e).await;
                return Err(e);
            }
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        self.audit
            .chat_success(ctx, &provider, request, &response, latency_ms)
            .await?;

        Ok(ChatResult {
            response,
            latency_ms,
            provider,
            model: request.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamkb_core::models::{AuditStatus, Subject};
    use teamkb_core::store::memory::InMemoryStore;

    fn mock_ai(dims: usize) -> AiConfig {
        AiConfig {
            enabled: true,
            provider: "mock".into(),
            embedding_dimension: dims,
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_is_not_audited() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = EmbeddingOrchestrator::new(AiConfig::default(), store.clone());
        assert!(!orchestrator.is_configured());
        let err = orchestrator
            .embed(&["x".to_string()], &AuditContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(store.list_audit_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mock_batch_is_fitted_and_audited_once() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = EmbeddingOrchestrator::new(mock_ai(32), store.clone());
        let ctx = AuditContext::new(Some(7), Subject::knowledge_item(3));
        let texts = vec!["a".repeat(40), "b".repeat(8)];
        let result = orchestrator.embed(&texts, &ctx).await.unwrap();

        assert_eq!(result.vectors.len(), 2);
        assert!(result.vectors.iter().all(|v| v.len() == 32));
        assert_eq!(result.total_tokens, Some(12));

        let audits = store.list_audit_entries().await.unwrap();
        assert_eq!(audits.len(), 1);
        let entry = &audits[0];
        assert_eq!(entry.status, AuditStatus::Success);
        assert_eq!(entry.provider, "mock");
        assert_eq!(entry.user_id, Some(7));
        assert_eq!(entry.subject_type.as_deref(), Some("knowledge_item"));
        assert_eq!(entry.subject_id, Some(3));
        let response = entry.response_payload.as_ref().unwrap();
        assert_eq!(response["embedding_count"], 2);
        assert_eq!(response["dimensions"], 32);
        assert_eq!(entry.request_payload["input_count"], 2);
    }

    #[tokio::test]
    async fn empty_batch_skips_provider() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = EmbeddingOrchestrator::new(mock_ai(8), store.clone());
        let result = orchestrator
            .embed(&[], &AuditContext::default())
            .await
            .unwrap();
        assert!(result.vectors.is_empty());
        assert_eq!(result.latency_ms, 0);
        let audits = store.list_audit_entries().await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].status, AuditStatus::Success);
    }

    #[tokio::test]
    async fn mock_chat_is_audited_with_request_envelope() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = ChatOrchestrator::new(mock_ai(8), store.clone());
        assert_eq!(orchestrator.provider_name(), "mock");
        let request = ChatRequest {
            model: orchestrator.default_model(),
            messages: vec![teamkb_core::prompt::ChatMessage::user("hello")],
            temperature: orchestrator.temperature(),
            max_output_tokens: orchestrator.max_output_tokens(),
            metadata: serde_json::json!({"rag_query_id": 1}),
        };
        let result = orchestrator
            .complete(&request, &AuditContext::new(None, Subject::rag_query(1)))
            .await
            .unwrap();
        assert_eq!(result.provider, "mock");
        assert_eq!(result.model, "mock");

        let audits = store.list_audit_entries().await.unwrap();
        assert_eq!(audits.len(), 1);
        let entry = &audits[0];
        assert_eq!(entry.request_payload["messages"][0]["role"], "user");
        assert_eq!(entry.request_payload["metadata"]["rag_query_id"], 1);
        assert_eq!(entry.output_tokens, Some(50));
        assert!(entry.response_text.is_some());
    }
}
