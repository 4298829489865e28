//! Audit trail for external AI calls.
//!
//! One [`AiAuditLogEntry`] is written per call attempt that reaches a
//! provider. Payloads are sanitized: chat entries record the request
//! envelope, embedding entries record only counts and a short input
//! preview. API keys never reach this module.

use std::sync::Arc;

use teamkb_core::models::{AiAuditLogEntry, AuditStatus, Subject};
use teamkb_core::store::Store;

use crate::chat::{ChatRequest, ChatResponse};
use crate::error::{KbError, KbResult};

/// Characters of the first input kept in an embedding request preview.
const INPUT_PREVIEW_CHARS: usize = 200;

/// Who triggered an AI call and which entity it belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditContext {
    pub user_id: Option<i64>,
    pub subject: Option<Subject>,
}

impl AuditContext {
    pub fn new(user_id: Option<i64>, subject: Subject) -> Self {
        Self {
            user_id,
            subject: Some(subject),
        }
    }
}

/// Outcome of an embedding call, as recorded in the audit entry.
pub struct EmbeddingAudit {
    pub embedding_count: usize,
    pub dimensions: usize,
    pub total_tokens: Option<i64>,
    pub latency_ms: i64,
}

pub struct AuditLogger {
    store: Arc<dyn Store>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn entry(
        ctx: &AuditContext,
        provider: &str,
        model: &str,
        request_payload: serde_json::Value,
        status: AuditStatus,
    ) -> AiAuditLogEntry {
        AiAuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: ctx.user_id,
            subject_type: ctx.subject.map(|s| s.kind.as_str().to_string()),
            subject_id: ctx.subject.map(|s| s.id),
            provider: provider.to_string(),
            model: model.to_string(),
            request_payload,
            response_payload: None,
            response_text: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            status,
            error_message: None,
            latency_ms: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub async fn chat_success(
        &self,
        ctx: &AuditContext,
        provider: &str,
        request: &ChatRequest,
        response: &ChatResponse,
        latency_ms: i64,
    ) -> KbResult<()> {
        let mut entry = Self::entry(
            ctx,
            provider,
            &request.model,
            chat_payload(request),
            AuditStatus::Success,
        );
        entry.response_payload = Some(response.raw.clone());
        entry.response_text = Some(response.text.clone());
        entry.input_tokens = response.input_tokens;
        entry.output_tokens = response.output_tokens;
        entry.total_tokens = response.total_tokens;
        entry.latency_ms = Some(latency_ms);
        self.store.insert_audit_entry(&entry).await?;
        Ok(())
    }

    pub async fn chat_error(
        &self,
        ctx: &AuditContext,
        provider: &str,
        request: &ChatRequest,
        error: &KbError,
    ) {
        let mut entry = Self::entry(
            ctx,
            provider,
            &request.model,
            chat_payload(request),
            AuditStatus::Error,
        );
        entry.error_message = Some(error.to_string());
        self.write_error_entry(&entry).await;
    }

    pub async fn embedding_success(
        &self,
        ctx: &AuditContext,
        provider: &str,
        model: &str,
        request_payload: serde_json::Value,
        outcome: &EmbeddingAudit,
    ) -> KbResult<()> {
        let mut entry = Self::entry(ctx, provider, model, request_payload, AuditStatus::Success);
        entry.response_payload = Some(serde_json::json!({
            "embedding_count": outcome.embedding_count,
            "dimensions": outcome.dimensions,
            "total_tokens": outcome.total_tokens,
        }));
        entry.input_tokens = outcome.total_tokens;
        entry.total_tokens = outcome.total_tokens;
        entry.latency_ms = Some(outcome.latency_ms);
        self.store.insert_audit_entry(&entry).await?;
        Ok(())
    }

    pub async fn embedding_error(
        &self,
        ctx: &AuditContext,
        provider: &str,
        model: &str,
        request_payload: serde_json::Value,
        error: &KbError,
    ) {
        let mut entry = Self::entry(ctx, provider, model, request_payload, AuditStatus::Error);
        entry.error_message = Some(error.to_string());
        self.write_error_entry(&entry).await;
    }

    /// The original provider error matters more than a failed audit write,
    /// so the write failure is only logged.
    async fn write_error_entry(&self, entry: &AiAuditLogEntry) {
        if let Err(e) = self.store.insert_audit_entry(entry).await {
            tracing::warn!(provider = %entry.provider, error = %e, "failed to write audit entry");
        }
    }
}

/// Sanitized embedding request: model, input count, and a short preview
/// of the first input.
pub fn embedding_payload(model: &str, texts: &[String]) -> serde_json::Value {
    let preview: Option<String> = texts
        .first()
        .map(|t| t.chars().take(INPUT_PREVIEW_CHARS).collect());
    serde_json::json!({
        "model": model,
        "input_count": texts.len(),
        "input_preview": preview,
    })
}

fn chat_payload(request: &ChatRequest) -> serde_json::Value {
    serde_json::json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "max_output_tokens": request.max_output_tokens,
        "metadata": request.metadata,
    })
}
