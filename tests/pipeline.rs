//! End-to-end ingestion and answering against the in-memory store with
//! the mock provider.

use std::sync::Arc;

use async_trait::async_trait;

use teamkb::app::App;
use teamkb::config::{AiConfig, Config};
use teamkb::embedding::{EmbeddingClient, EmbeddingOutput};
use teamkb::error::{KbError, KbResult};
use teamkb::ingest::{ProcessOutcome, NO_TEXT_MESSAGE};
use teamkb::ingest_service::{DocumentUpload, EmailInput};
use teamkb::orchestrator::EmbeddingOrchestrator;
use teamkb::queue::{DeferredQueue, InlineQueue, JobQueue, WorkerQueue};
use teamkb::retrieval::RetrievalEngine;
use teamkb::audit::AuditContext;

use teamkb_core::models::{ActivityAction, AuditStatus, ItemStatus};
use teamkb_core::prompt::NO_CONTEXT;
use teamkb_core::store::memory::{InMemoryBlobStore, InMemoryStore};
use teamkb_core::store::Store;

const DIMS: usize = 32;

fn mock_config() -> Config {
    let toml_str = format!(
        "[db]\npath = \"unused.sqlite\"\n[ai]\nenabled = true\nprovider = \"mock\"\nembedding_dimension = {}\n",
        DIMS
    );
    toml::from_str(&toml_str).unwrap()
}

fn mock_app() -> (App, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let app = App::from_parts(
        mock_config(),
        store.clone(),
        Arc::new(InMemoryBlobStore::new()),
    );
    (app, store)
}

fn text_upload(name: &str, body: &str) -> DocumentUpload {
    DocumentUpload {
        filename: name.to_string(),
        mime: "text/plain".to_string(),
        bytes: body.as_bytes().to_vec(),
    }
}

/// 3000 characters of varied text: four overlapping windows.
fn long_text() -> String {
    (0..3000)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect()
}

#[tokio::test]
async fn document_of_3000_chars_yields_four_chunks() {
    let (app, store) = mock_app();
    let svc = app.ingest_service(Arc::new(DeferredQueue));
    let item = svc
        .create_from_document(1, Some(5), text_upload("long.txt", &long_text()))
        .await
        .unwrap();

    let outcome = app.pipeline.process(item.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Processed { chunks: 4 });

    let chunks = store.list_chunks(item.id).await.unwrap();
    let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert!(chunks
        .iter()
        .all(|c| c.embedding.as_ref().map(Vec::len) == Some(DIMS)));
    // 3000 chars / 4 per token, split evenly across four chunks.
    assert!(chunks.iter().all(|c| c.tokens_count.is_some()));

    let stored = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Processed);
    assert!(stored.error_message.is_none());
    assert_eq!(stored.raw_text.as_deref().map(str::len), Some(3000));

    let actions: Vec<ActivityAction> = store
        .list_activity()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::KnowledgeItemUploaded,
            ActivityAction::KnowledgeItemProcessed
        ]
    );

    let audits = store.list_audit_entries().await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].subject_type.as_deref(), Some("knowledge_item"));
    assert_eq!(audits[0].subject_id, Some(item.id));
}

#[tokio::test]
async fn processing_twice_is_a_no_op() {
    let (app, store) = mock_app();
    let svc = app.ingest_service(Arc::new(DeferredQueue));
    let item = svc
        .create_from_email(1, None, EmailInput {
            body_text: "Standup moved to 10:00.".into(),
            ..EmailInput::default()
        })
        .await
        .unwrap();

    app.pipeline.process(item.id).await.unwrap();
    let first: Vec<i64> = store
        .list_chunks(item.id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    let second = app.pipeline.process(item.id).await.unwrap();
    assert_eq!(second, ProcessOutcome::Skipped);
    let again: Vec<i64> = store
        .list_chunks(item.id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(first, again);
    assert_eq!(store.list_audit_entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_item_is_skipped() {
    let (app, _) = mock_app();
    assert_eq!(
        app.pipeline.process(999).await.unwrap(),
        ProcessOutcome::Skipped
    );
}

#[tokio::test]
async fn whitespace_document_fails_without_content() {
    let (app, store) = mock_app();
    let svc = app.ingest_service(Arc::new(DeferredQueue));
    let item = svc
        .create_from_document(1, None, text_upload("blank.txt", " \n\t \n"))
        .await
        .unwrap();

    let outcome = app.pipeline.process(item.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::NoContent);

    let stored = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(NO_TEXT_MESSAGE));
    assert!(store.list_audit_entries().await.unwrap().is_empty());
}

/// Returns one vector fewer than asked for.
struct ShortEmbedder;

#[async_trait]
impl EmbeddingClient for ShortEmbedder {
    fn provider_name(&self) -> &str {
        "short"
    }

    fn model_name(&self) -> &str {
        "short-1"
    }

    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput> {
        Ok(EmbeddingOutput {
            vectors: vec![vec![1.0; DIMS]; texts.len().saturating_sub(1)],
            total_tokens: Some(10),
        })
    }
}

#[tokio::test]
async fn embedding_count_mismatch_fails_without_partial_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let config = mock_config();
    let embeddings = Arc::new(
        EmbeddingOrchestrator::new(config.ai.clone(), store.clone())
            .with_client(Arc::new(ShortEmbedder)),
    );
    let app = App::with_embeddings(
        config,
        store.clone(),
        Arc::new(InMemoryBlobStore::new()),
        embeddings,
    );
    let svc = app.ingest_service(Arc::new(DeferredQueue));
    let item = svc
        .create_from_document(1, None, text_upload("long.txt", &long_text()))
        .await
        .unwrap();

    let err = app.pipeline.process(item.id).await.unwrap_err();
    assert!(matches!(err, KbError::ContractViolation(_)));

    let stored = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("Embedding count does not match chunk count.")
    );
    assert!(store.list_chunks(item.id).await.unwrap().is_empty());

    let failed = store
        .list_activity()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.action == ActivityAction::KnowledgeItemFailed)
        .unwrap();
    assert_eq!(failed.metadata["title"], "long");
    assert!(failed.metadata["error"].as_str().unwrap().contains("does not match"));
}

/// Sleeps before answering so concurrent runs overlap.
struct SlowEmbedder;

#[async_trait]
impl EmbeddingClient for SlowEmbedder {
    fn provider_name(&self) -> &str {
        "slow"
    }

    fn model_name(&self) -> &str {
        "slow-1"
    }

    async fn embed(&self, texts: &[String]) -> KbResult<EmbeddingOutput> {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(EmbeddingOutput {
            vectors: vec![vec![0.5; DIMS]; texts.len()],
            total_tokens: Some(4),
        })
    }
}

fn slow_app(store: Arc<InMemoryStore>, blobs: Arc<InMemoryBlobStore>) -> App {
    let config = mock_config();
    let embeddings = Arc::new(
        EmbeddingOrchestrator::new(config.ai.clone(), store.clone())
            .with_client(Arc::new(SlowEmbedder)),
    );
    App::with_embeddings(config, store, blobs, embeddings)
}

#[tokio::test]
async fn two_apps_sharing_a_store_process_an_item_once() {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let first = slow_app(store.clone(), blobs.clone());
    let second = slow_app(store.clone(), blobs);

    let item = first
        .ingest_service(Arc::new(DeferredQueue))
        .create_from_email(1, None, EmailInput {
            body_text: "Deploy freeze starts Friday.".into(),
            ..EmailInput::default()
        })
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        first.pipeline.process(item.id),
        second.pipeline.process(item.id)
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, ProcessOutcome::Skipped));
    assert_eq!(
        outcomes,
        vec![ProcessOutcome::Processed { chunks: 1 }, ProcessOutcome::Skipped]
    );

    assert_eq!(store.list_audit_entries().await.unwrap().len(), 1);
    let processed = store
        .list_activity()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.action == ActivityAction::KnowledgeItemProcessed)
        .count();
    assert_eq!(processed, 1);
    assert_eq!(store.list_chunks(item.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retrieval_is_project_scoped() {
    let (app, store) = mock_app();
    let svc = app.ingest_service(Arc::new(InlineQueue::new(app.pipeline.clone())));
    svc.create_from_document(1, None, text_upload("ours.txt", "Project one secret."))
        .await
        .unwrap();
    let theirs = svc
        .create_from_document(2, None, text_upload("theirs.txt", "Project two secret."))
        .await
        .unwrap();

    let retrieval = RetrievalEngine::new(store.clone(), app.embeddings.clone());
    let chunks = retrieval
        .retrieve(1, "secret", &AuditContext::default())
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].source_title.as_deref(), Some("ours"));
    assert!(chunks.iter().all(|c| c.source_item_id != theirs.id));
}

#[tokio::test]
async fn blank_question_short_circuits_retrieval() {
    let (app, store) = mock_app();
    let retrieval = RetrievalEngine::new(store.clone(), app.embeddings.clone());
    let chunks = retrieval
        .retrieve(1, "   \n", &AuditContext::default())
        .await
        .unwrap();
    assert!(chunks.is_empty());
    assert!(store.list_audit_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_without_vector_search_returns_nothing() {
    let store = Arc::new(InMemoryStore::without_vector_search());
    let embeddings = Arc::new(EmbeddingOrchestrator::new(mock_config().ai, store.clone()));
    let retrieval = RetrievalEngine::new(store.clone(), embeddings);
    let chunks = retrieval
        .retrieve(1, "anything", &AuditContext::default())
        .await
        .unwrap();
    assert!(chunks.is_empty());
    // The question was still embedded.
    assert_eq!(store.list_audit_entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_project_prompt_has_no_context_placeholder() {
    let (app, store) = mock_app();
    let outcome = app.answers.ask(7, Some(3), "What is our SLA?").await.unwrap();
    assert!(outcome.citations.is_empty());

    let chat = store
        .list_audit_entries()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.request_payload.get("messages").is_some())
        .unwrap();
    let user_message = chat.request_payload["messages"][1]["content"]
        .as_str()
        .unwrap();
    assert!(user_message.contains(NO_CONTEXT));
    assert!(user_message.ends_with("Question: What is our SLA?"));
    assert_eq!(chat.subject_type.as_deref(), Some("rag_query"));
    assert_eq!(chat.user_id, Some(3));

    let query = store
        .get_rag_query(outcome.rag_query_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(query.answer_text.as_deref(), Some(outcome.answer_text.as_str()));
    assert_eq!(query.cited_chunk_ids, Some(vec![]));
    assert_eq!(query.provider.as_deref(), Some("mock"));
    assert_eq!(query.model.as_deref(), Some("mock"));
}

#[tokio::test]
async fn answer_cites_chunks_in_retrieval_order() {
    let (app, store) = mock_app();
    let svc = app.ingest_service(Arc::new(InlineQueue::new(app.pipeline.clone())));
    let long = "Runbook step. ".repeat(40);
    svc.create_from_document(1, None, text_upload("runbook.txt", &long))
        .await
        .unwrap();

    let outcome = app
        .answers
        .ask(1, None, "How do I run the runbook?")
        .await
        .unwrap();
    assert_eq!(outcome.citations.len(), 1);
    let citation = &outcome.citations[0];
    assert_eq!(citation.source_title.as_deref(), Some("runbook"));
    assert!(citation.excerpt.ends_with('…'));
    assert_eq!(citation.excerpt.chars().count(), 301);

    let query = store
        .get_rag_query(outcome.rag_query_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(query.cited_chunk_ids, Some(vec![citation.chunk_id]));

    let asked = store
        .list_activity()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.action == ActivityAction::RagAsked)
        .count();
    assert_eq!(asked, 1);
}

#[tokio::test]
async fn ask_with_ai_disabled_creates_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = mock_config();
    config.ai = AiConfig::default();
    let app = App::from_parts(config, store.clone(), Arc::new(InMemoryBlobStore::new()));

    let err = app.answers.ask(1, None, "anything?").await.unwrap_err();
    assert!(matches!(err, KbError::NotConfigured(_)));
    assert!(store.get_rag_query(1).await.unwrap().is_none());
    assert!(store.list_audit_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_queue_drains_on_shutdown() {
    let (app, store) = mock_app();
    let queue = Arc::new(WorkerQueue::start(app.pipeline.clone(), 3));
    let svc = app.ingest_service(queue.clone());
    let mut ids = Vec::new();
    for i in 0..5 {
        let item = svc
            .create_from_email(1, None, EmailInput {
                title: Some(format!("Mail {}", i)),
                body_text: format!("Body number {}", i),
                ..EmailInput::default()
            })
            .await
            .unwrap();
        ids.push(item.id);
    }
    // Duplicate job for an item already queued.
    queue.enqueue(ids[0]).await.unwrap();
    drop(svc);

    let Ok(queue) = Arc::try_unwrap(queue) else {
        panic!("queue still shared");
    };
    queue.shutdown().await;

    for id in ids {
        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Processed);
        assert_eq!(store.list_chunks(id).await.unwrap().len(), 1);
    }
    let successes = store
        .list_audit_entries()
        .await
        .unwrap()
        .iter()
        .filter(|e| e.status == AuditStatus::Success)
        .count();
    assert_eq!(successes, 5);
}
