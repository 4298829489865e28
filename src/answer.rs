//! Grounded question answering over a project's knowledge base.

use std::sync::Arc;

use serde::Serialize;

use teamkb_core::models::{ActivityAction, NewActivity, NewRagQuery, RagAnswer, Subject};
use teamkb_core::prompt::{build_context_prompt, excerpt, grounded_messages};
use teamkb_core::store::Store;

use crate::audit::AuditContext;
use crate::chat::ChatRequest;
use crate::error::{KbError, KbResult};
use crate::orchestrator::{ChatOrchestrator, EmbeddingOrchestrator};
use crate::retrieval::RetrievalEngine;

pub const MAX_QUESTION_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: i64,
    pub excerpt: String,
    pub source_title: Option<String>,
    pub source_item_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub rag_query_id: i64,
    pub answer_text: String,
    /// In retrieval order; `[n]` in the answer refers to `citations[n - 1]`.
    pub citations: Vec<Citation>,
}

pub struct AnswerComposer {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingOrchestrator>,
    retrieval: RetrievalEngine,
    chat: ChatOrchestrator,
}

impl AnswerComposer {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Arc<EmbeddingOrchestrator>,
        chat: ChatOrchestrator,
    ) -> Self {
        let retrieval = RetrievalEngine::new(store.clone(), embeddings.clone());
        Self {
            store,
            embeddings,
            retrieval,
            chat,
        }
    }

    /// Answer `question` from the project's knowledge base.
    ///
    /// Configuration problems are reported before anything is written. Once
    /// the query row exists, any failure leaves it unanswered and is
    /// returned unchanged.
    pub async fn ask(
        &self,
        project_id: i64,
        user_id: Option<i64>,
        question: &str,
    ) -> KbResult<AskOutcome> {
        if question.trim().is_empty() {
            return Err(KbError::InvalidInput("Question is required.".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(KbError::InvalidInput(format!(
                "Question must be at most {} characters.",
                MAX_QUESTION_CHARS
            )));
        }
        self.chat.ensure_configured()?;
        self.embeddings.ensure_configured()?;

        let query = self
            .store
            .insert_rag_query(&NewRagQuery {
                project_id,
                user_id,
                question_text: question.to_string(),
            })
            .await?;
        let ctx = AuditContext::new(user_id, Subject::rag_query(query.id));

        let chunks = self.retrieval.retrieve(project_id, question, &ctx).await?;
        let context = build_context_prompt(&chunks);

        let request = ChatRequest {
            model: self.chat.default_model(),
            messages: grounded_messages(&context, question),
            temperature: self.chat.temperature(),
            max_output_tokens: self.chat.max_output_tokens(),
            metadata: serde_json::json!({
                "rag_query_id": query.id,
                "project_id": project_id,
            }),
        };
        let result = self.chat.complete(&request, &ctx).await?;
        let answer_text = result.response.text.trim().to_string();

        self.store
            .record_rag_answer(
                query.id,
                &RagAnswer {
                    answer_text: answer_text.clone(),
                    cited_chunk_ids: chunks.iter().map(|c| c.chunk_id).collect(),
                    provider: result.provider,
                    model: result.model,
                },
            )
            .await?;

        let activity = NewActivity::new(
            ActivityAction::RagAsked,
            Subject::rag_query(query.id),
            project_id,
        )
        .with_user(user_id);
        self.store.insert_activity(&activity).await?;

        tracing::info!(
            rag_query_id = query.id,
            project_id,
            citations = chunks.len(),
            "question answered"
        );

        let citations = chunks
            .into_iter()
            .map(|c| Citation {
                chunk_id: c.chunk_id,
                excerpt: excerpt(&c.text),
                source_title: c.source_title,
                source_item_id: c.source_item_id,
            })
            .collect();

        Ok(AskOutcome {
            rag_query_id: query.id,
            answer_text,
            citations,
        })
    }
}
