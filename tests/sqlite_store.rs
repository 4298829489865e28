//! SQLite store behaviour: chunk replacement, vector search, RAG query
//! answers, and append-only logs.

use std::sync::Arc;

use tempfile::TempDir;

use teamkb::app::App;
use teamkb::db;
use teamkb::migrate::run_migrations;
use teamkb::queue::InlineQueue;
use teamkb::ingest_service::EmailInput;
use teamkb::sqlite_store::SqliteStore;

use teamkb_core::models::{
    ActivityAction, AiAuditLogEntry, AuditStatus, ItemKind, ItemStatus, NewActivity, NewChunk,
    NewKnowledgeItem, NewRagQuery, RagAnswer, Subject,
};
use teamkb_core::store::Store;

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("data").join("kb.sqlite"))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    // Running twice must be harmless.
    run_migrations(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

fn email(project_id: i64, title: &str) -> NewKnowledgeItem {
    NewKnowledgeItem {
        project_id,
        kind: ItemKind::Email,
        title: title.to_string(),
        source_meta: serde_json::json!({ "from": "a@example.com", "sent_at": null }),
        original_content_path: None,
        raw_text: Some("body".to_string()),
    }
}

fn chunk(index: i64, embedding: Option<Vec<f32>>) -> NewChunk {
    NewChunk {
        chunk_index: index,
        content_text: format!("chunk {}", index),
        content_hash: format!("hash-{}", index),
        tokens_count: Some(3),
        embedding,
    }
}

#[tokio::test]
async fn item_lifecycle_round_trips() {
    let (_tmp, store) = open_store().await;
    let item = store.insert_item(&email(3, "Kickoff")).await.unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.kind, ItemKind::Email);
    assert_eq!(item.source_meta["from"], "a@example.com");

    store
        .set_item_status(item.id, ItemStatus::Failed, Some("boom"))
        .await
        .unwrap();
    store.set_item_text(item.id, "normalized").await.unwrap();
    let reloaded = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, ItemStatus::Failed);
    assert_eq!(reloaded.error_message, None);
    assert_eq!(reloaded.raw_text.as_deref(), Some("normalized"));

    assert!(store.set_item_status(9999, ItemStatus::Processed, None).await.is_err());
    assert_eq!(store.list_items(3).await.unwrap().len(), 1);
    assert!(store.list_items(4).await.unwrap().is_empty());
}

#[tokio::test]
async fn claim_is_compare_and_set() {
    let (_tmp, store) = open_store().await;
    let item = store.insert_item(&email(1, "Claimed")).await.unwrap();
    let done = store.insert_item(&email(1, "Done")).await.unwrap();
    store
        .set_item_status(done.id, ItemStatus::Processed, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(store.claim_item(item.id), store.claim_item(item.id));
    assert!(a.unwrap() ^ b.unwrap());
    assert!(!store.claim_item(item.id).await.unwrap());
    assert!(!store.claim_item(done.id).await.unwrap());
    assert!(!store.claim_item(4242).await.unwrap());
    // Claiming does not change the visible status.
    let reloaded = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, ItemStatus::Pending);
}

#[tokio::test]
async fn replace_chunks_is_all_or_nothing() {
    let (_tmp, store) = open_store().await;
    let item = store.insert_item(&email(1, "Notes")).await.unwrap();

    store
        .replace_chunks(item.id, &[chunk(0, Some(vec![1.0, 0.0])), chunk(1, None)])
        .await
        .unwrap();
    let first = store.list_chunks(item.id).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].embedding, Some(vec![1.0, 0.0]));
    assert_eq!(first[1].embedding, None);

    // Duplicate index violates UNIQUE(item, chunk_index); the old set survives.
    let err = store
        .replace_chunks(item.id, &[chunk(0, None), chunk(0, None)])
        .await;
    assert!(err.is_err());
    let after = store.list_chunks(item.id).await.unwrap();
    let ids: Vec<i64> = after.iter().map(|c| c.id).collect();
    assert_eq!(ids, first.iter().map(|c| c.id).collect::<Vec<_>>());

    store.replace_chunks(item.id, &[chunk(0, None)]).await.unwrap();
    assert_eq!(store.list_chunks(item.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn nearest_chunks_are_project_scoped_and_ordered() {
    let (_tmp, store) = open_store().await;
    let ours = store.insert_item(&email(1, "Ours")).await.unwrap();
    let theirs = store.insert_item(&email(2, "Theirs")).await.unwrap();

    store
        .replace_chunks(
            ours.id,
            &[
                chunk(0, Some(vec![0.0, 1.0])),
                chunk(1, Some(vec![1.0, 0.1])),
                chunk(2, None),
            ],
        )
        .await
        .unwrap();
    store
        .replace_chunks(theirs.id, &[chunk(0, Some(vec![1.0, 0.0]))])
        .await
        .unwrap();

    let hits = store.nearest_chunks(1, &[1.0, 0.0], 8).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "chunk 1");
    assert_eq!(hits[1].text, "chunk 0");
    assert!(hits.iter().all(|h| h.source_item_id == ours.id));
    assert_eq!(hits[0].source_title.as_deref(), Some("Ours"));

    let limited = store.nearest_chunks(1, &[1.0, 0.0], 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn rag_answer_recorded_once() {
    let (_tmp, store) = open_store().await;
    let query = store
        .insert_rag_query(&NewRagQuery {
            project_id: 1,
            user_id: Some(2),
            question_text: "Why?".into(),
        })
        .await
        .unwrap();
    assert!(query.answer_text.is_none());

    let answer = RagAnswer {
        answer_text: "Because.".into(),
        cited_chunk_ids: vec![7, 3, 5],
        provider: "mock".into(),
        model: "mock".into(),
    };
    store.record_rag_answer(query.id, &answer).await.unwrap();
    assert!(store.record_rag_answer(query.id, &answer).await.is_err());

    let stored = store.get_rag_query(query.id).await.unwrap().unwrap();
    assert_eq!(stored.answer_text.as_deref(), Some("Because."));
    assert_eq!(stored.cited_chunk_ids, Some(vec![7, 3, 5]));
    assert_eq!(stored.user_id, Some(2));
}

#[tokio::test]
async fn audit_and_activity_preserve_order() {
    let (_tmp, store) = open_store().await;
    for (i, status) in [AuditStatus::Success, AuditStatus::Error].into_iter().enumerate() {
        store
            .insert_audit_entry(&AiAuditLogEntry {
                id: format!("z-{}", 9 - i),
                user_id: None,
                subject_type: Some("rag_query".into()),
                subject_id: Some(1),
                provider: "openai".into(),
                model: "gpt-4o-mini".into(),
                request_payload: serde_json::json!({ "model": "gpt-4o-mini" }),
                response_payload: None,
                response_text: None,
                input_tokens: None,
                output_tokens: None,
                total_tokens: None,
                status,
                error_message: (status == AuditStatus::Error).then(|| "nope".to_string()),
                latency_ms: None,
                created_at: 0,
            })
            .await
            .unwrap();
    }
    let audits = store.list_audit_entries().await.unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].status, AuditStatus::Success);
    assert_eq!(audits[1].error_message.as_deref(), Some("nope"));
    assert_eq!(audits[0].request_payload["model"], "gpt-4o-mini");

    let entry = store
        .insert_activity(
            &NewActivity::new(ActivityAction::RagAsked, Subject::rag_query(1), 4)
                .with_user(Some(8)),
        )
        .await
        .unwrap();
    assert_eq!(entry.subject_type.as_deref(), Some("rag_query"));
    let activity = store.list_activity().await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].action, ActivityAction::RagAsked);
    assert_eq!(activity[0].user_id, Some(8));
}

#[tokio::test]
async fn app_processes_email_into_sqlite() {
    let tmp = TempDir::new().unwrap();
    let config_str = format!(
        "[db]\npath = \"{root}/kb.sqlite\"\n[storage]\nroot = \"{root}/blobs\"\n[ai]\nenabled = true\nprovider = \"mock\"\nembedding_dimension = 16\n",
        root = tmp.path().display()
    );
    let config = toml::from_str(&config_str).unwrap();
    let app = App::open(config).await.unwrap();
    let svc = app.ingest_service(Arc::new(InlineQueue::new(app.pipeline.clone())));
    let item = svc
        .create_from_email(5, Some(1), EmailInput {
            title: Some("Ops".into()),
            body_text: "Pager rotation changes Monday.".into(),
            ..EmailInput::default()
        })
        .await
        .unwrap();

    let stored = app.store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Processed);
    let chunks = app.store.list_chunks(item.id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].embedding.as_ref().map(Vec::len), Some(16));

    let outcome = app.answers.ask(5, Some(1), "When does rotation change?").await.unwrap();
    assert_eq!(outcome.citations.len(), 1);
    assert_eq!(outcome.citations[0].chunk_id, chunks[0].id);
}
