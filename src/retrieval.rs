//! Project-scoped semantic retrieval.

use std::sync::Arc;

use teamkb_core::models::RetrievedChunk;
use teamkb_core::store::Store;

use crate::audit::AuditContext;
use crate::error::KbResult;
use crate::orchestrator::EmbeddingOrchestrator;

/// Chunks returned per question.
pub const TOP_K: usize = 8;

pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingOrchestrator>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn Store>, embeddings: Arc<EmbeddingOrchestrator>) -> Self {
        Self { store, embeddings }
    }

    /// Up to [`TOP_K`] chunks of `project_id` nearest to the question, most
    /// similar first. A blank question returns nothing without calling the
    /// embedding provider.
    pub async fn retrieve(
        &self,
        project_id: i64,
        question: &str,
        ctx: &AuditContext,
    ) -> KbResult<Vec<RetrievedChunk>> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Vec::new());
        }

        let result = self
            .embeddings
            .embed(&[question.to_string()], ctx)
            .await?;
        let Some(vector) = result.vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        if !self.store.supports_vector_search() {
            tracing::warn!(project_id, "store has no vector search; returning no context");
            return Ok(Vec::new());
        }

        let chunks = self.store.nearest_chunks(project_id, &vector, TOP_K).await?;
        tracing::debug!(project_id, hits = chunks.len(), "retrieved chunks");
        Ok(chunks)
    }
}
