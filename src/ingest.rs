//! Background processing of a single knowledge item.
//!
//! `pending` items move to exactly one of `processed` or `failed`:
//!
//! 1. Extract and normalize text.
//! 2. Persist the text, keeping the item `pending`.
//! 3. Chunk.
//! 4. Embed every chunk in one orchestrator call.
//! 5. Replace the item's chunks in one transaction.
//! 6. Mark `processed` and record activity.
//!
//! Any failure marks the item `failed`, records a `knowledge_item.failed`
//! activity, and is returned to the caller.

use std::sync::Arc;

use teamkb_core::chunk::chunk_text;
use teamkb_core::models::{
    ActivityAction, ItemStatus, KnowledgeItem, NewActivity, NewChunk, Subject,
};
use teamkb_core::store::Store;

use crate::audit::AuditContext;
use crate::error::{KbError, KbResult};
use crate::extract::TextExtractor;
use crate::orchestrator::EmbeddingOrchestrator;

pub const NO_TEXT_MESSAGE: &str = "No text content extracted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Item missing, not pending, or claimed by another run.
    Skipped,
    /// Extraction yielded no text; the item is now `failed`.
    NoContent,
    Processed { chunks: usize },
}

pub struct KnowledgeIngestPipeline {
    store: Arc<dyn Store>,
    extractor: TextExtractor,
    embeddings: Arc<EmbeddingOrchestrator>,
}

impl KnowledgeIngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: TextExtractor,
        embeddings: Arc<EmbeddingOrchestrator>,
    ) -> Self {
        Self {
            store,
            extractor,
            embeddings,
        }
    }

    /// Process one item. The store claim is atomic, so only one run per
    /// item gets past it no matter how many pipelines share the store;
    /// every other run is a no-op.
    pub async fn process(&self, item_id: i64) -> KbResult<ProcessOutcome> {
        if !self.store.claim_item(item_id).await? {
            tracing::debug!(item_id, "item not claimable, skipping");
            return Ok(ProcessOutcome::Skipped);
        }
        let Some(item) = self.store.get_item(item_id).await? else {
            return Ok(ProcessOutcome::Skipped);
        };

        match self.run(&item).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&item, &e).await;
                Err(e)
            }
        }
    }

    async fn run(&self, item: &KnowledgeItem) -> KbResult<ProcessOutcome> {
        let text = self.extractor.extract(item).await?;
        if text.is_empty() {
            self.store
                .set_item_status(item.id, ItemStatus::Failed, Some(NO_TEXT_MESSAGE))
                .await?;
            tracing::warn!(item_id = item.id, "no text content extracted");
            return Ok(ProcessOutcome::NoContent);
        }

        self.store.set_item_text(item.id, &text).await?;

        let pieces = chunk_text(&text);
        if pieces.is_empty() {
            self.store
                .set_item_status(item.id, ItemStatus::Processed, None)
                .await?;
            return Ok(ProcessOutcome::Processed { chunks: 0 });
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let ctx = AuditContext::new(None, Subject::knowledge_item(item.id));
        let result = self.embeddings.embed(&texts, &ctx).await?;
        if result.vectors.len() != pieces.len() {
            return Err(KbError::ContractViolation(
                "Embedding count does not match chunk count.".to_string(),
            ));
        }

        let per_chunk_tokens = result
            .total_tokens
            .filter(|t| *t > 0)
            .map(|t| t / pieces.len() as i64);
        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(result.vectors)
            .enumerate()
            .map(|(i, (piece, vector))| NewChunk {
                chunk_index: i as i64,
                content_text: piece.text,
                content_hash: piece.hash,
                tokens_count: per_chunk_tokens,
                embedding: Some(vector),
            })
            .collect();
        self.store.replace_chunks(item.id, &chunks).await?;

        self.store
            .set_item_status(item.id, ItemStatus::Processed, None)
            .await?;
        let activity = NewActivity::new(
            ActivityAction::KnowledgeItemProcessed,
            Subject::knowledge_item(item.id),
            item.project_id,
        )
        .with_metadata(serde_json::json!({ "title": item.title }));
        self.store.insert_activity(&activity).await?;

        tracing::info!(item_id = item.id, chunks = chunks.len(), "knowledge item processed");
        Ok(ProcessOutcome::Processed {
            chunks: chunks.len(),
        })
    }

    /// Record a failure on the item and the activity trail. Errors while
    /// recording are logged so the original error still reaches the caller.
    async fn fail(&self, item: &KnowledgeItem, error: &KbError) {
        let message = error.to_string();
        tracing::error!(item_id = item.id, error = %message, "knowledge item processing failed");

        if let Err(e) = self
            .store
            .set_item_status(item.id, ItemStatus::Failed, Some(&message))
            .await
        {
            tracing::warn!(item_id = item.id, error = %e, "failed to mark item failed");
        }
        let activity = NewActivity::new(
            ActivityAction::KnowledgeItemFailed,
            Subject::knowledge_item(item.id),
            item.project_id,
        )
        .with_metadata(serde_json::json!({ "title": item.title, "error": message }));
        if let Err(e) = self.store.insert_activity(&activity).await {
            tracing::warn!(item_id = item.id, error = %e, "failed to record failure activity");
        }
    }
}
