//! Postgres repository integration tests.
//!
//! **IMPORTANT**: These tests require a migrated PostgreSQL database with the
//! pgvector extension. Run migrations first: `sqlx migrate run`, then
//! `cargo test -p rhizome-db -- --ignored`.

use rhizome_db::test_fixtures::TestDatabase;
use rhizome_db::{
    Annotation, AnnotationAnchor, AnnotationRepository, BatchTag, ChunkRepository, Connection,
    ConnectionRepository, DocumentRepository, DocumentStatus, NewChunk, RecoveryMethod,
    RecoveryOutcome, SuggestedMatch, TextContext,
};
use serde_json::json;
use uuid::Uuid;

async fn setup() -> TestDatabase {
    dotenvy::dotenv().ok();
    TestDatabase::new()
        .await
        .expect("Failed to connect to test database")
}

fn batch_of(n: usize) -> Vec<NewChunk> {
    (0..n)
        .map(|i| NewChunk::new(i, i * 100, i * 100 + 100, format!("chunk {}", i)))
        .collect()
}

#[tokio::test]
#[ignore]
async fn test_chunk_generation_swap() {
    let test_db = setup().await;
    let db = &test_db.db;
    let doc = test_db.create_document().await.unwrap();

    let first = BatchTag::generate();
    db.chunks.insert_batch(doc, &first, batch_of(2)).await.unwrap();
    db.chunks.activate_batch(doc, &first).await.unwrap();
    let original = db.chunks.list_current(doc).await.unwrap();
    assert_eq!(original.len(), 2);

    let deactivated = db.chunks.deactivate_current(doc).await.unwrap();
    assert_eq!(deactivated.len(), 2);

    let mut with_embedding = batch_of(3);
    with_embedding[0].embedding = Some(pgvector::Vector::from(vec![0.1, 0.2, 0.3]));
    let second = BatchTag::generate();
    let inserted = db.chunks.insert_batch(doc, &second, with_embedding).await.unwrap();
    assert!(inserted.iter().all(|c| !c.is_current));
    assert_eq!(db.chunks.list_all(doc).await.unwrap().len(), 5);

    // discard path
    db.chunks.delete_batch(doc, &second).await.unwrap();
    db.chunks.reactivate(&deactivated).await.unwrap();
    assert_eq!(db.chunks.list_current(doc).await.unwrap(), original);

    test_db.cleanup_document(doc).await;
}

#[tokio::test]
#[ignore]
async fn test_annotation_recovery_round_trip() {
    let test_db = setup().await;
    let db = &test_db.db;
    let doc = test_db.create_document().await.unwrap();

    let annotation = Annotation::new(
        doc,
        AnnotationAnchor {
            chunk_ids: vec![],
            start_offset: 10,
            end_offset: 20,
            original_text: "some words".into(),
            text_context: TextContext::new("before ", " after"),
            original_chunk_index: Some(0),
        },
    );
    db.annotations.insert(&annotation).await.unwrap();

    let suggestion = SuggestedMatch {
        start_offset: 12,
        end_offset: 22,
        confidence: 0.6,
        method: RecoveryMethod::Trigram,
        context_before: "b".into(),
        context_after: "a".into(),
        chunk_ids: vec![],
        chunk_index: Some(0),
    };
    db.annotations.flag_for_review(annotation.id, &suggestion).await.unwrap();
    let queued = db.annotations.get(annotation.id).await.unwrap().unwrap();
    assert!(queued.needs_review);
    assert_eq!(queued.suggested_match, Some(suggestion.clone()));
    assert_eq!(queued.anchor.start_offset, 10);

    let outcome = RecoveryOutcome::from(&suggestion);
    db.annotations.apply_recovery(annotation.id, &outcome).await.unwrap();
    let applied = db.annotations.get(annotation.id).await.unwrap().unwrap();
    assert!(!applied.needs_review);
    assert_eq!(applied.anchor.start_offset, 12);
    assert_eq!(applied.recovery_method, Some(RecoveryMethod::Trigram));

    db.annotations.mark_lost(annotation.id).await.unwrap();
    assert!(db.annotations.get(annotation.id).await.unwrap().unwrap().unresolved);

    db.annotations.restore(&annotation).await.unwrap();
    assert_eq!(db.annotations.get(annotation.id).await.unwrap().unwrap(), annotation);

    test_db.cleanup_document(doc).await;
}

#[tokio::test]
#[ignore]
async fn test_connection_flag_stale() {
    let test_db = setup().await;
    let db = &test_db.db;

    let source = Uuid::now_v7();
    let connection = Connection {
        id: Uuid::now_v7(),
        source_chunk_id: source,
        target_chunk_id: Uuid::now_v7(),
        connection_type: "thematic".into(),
        strength: 0.8,
        metadata: json!({ "detector": "test" }),
    };
    db.connections.insert(&connection).await.unwrap();
    db.connections.flag_stale(connection.id, "unmapped").await.unwrap();

    let listed = db.connections.list_for_chunks(&[source]).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata["stale_reference"], json!(true));
    assert_eq!(listed[0].metadata["detector"], json!("test"));

    db.connections
        .update_endpoints(connection.id, Uuid::now_v7(), connection.target_chunk_id)
        .await
        .unwrap();
    db.connections.restore(&connection).await.unwrap();
    let restored = db.connections.list_for_chunks(&[source]).await.unwrap();
    assert_eq!(restored, vec![connection.clone()]);

    sqlx::query("DELETE FROM connections WHERE id = $1")
        .bind(connection.id)
        .execute(&db.pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_document_status_updates() {
    let test_db = setup().await;
    let db = &test_db.db;
    let doc = test_db.create_document().await.unwrap();

    db.documents.set_status(doc, DocumentStatus::Reprocessing, None).await.unwrap();
    db.documents.set_progress(doc, 40, "chunks_inserted").await.unwrap();
    let loaded = db.documents.get(doc).await.unwrap();
    assert_eq!(loaded.status, DocumentStatus::Reprocessing);
    assert_eq!(loaded.progress, 40);
    assert_eq!(loaded.processing_stage.as_deref(), Some("chunks_inserted"));

    assert!(db
        .documents
        .set_status(Uuid::now_v7(), DocumentStatus::Failed, Some("x"))
        .await
        .is_err());

    test_db.cleanup_document(doc).await;
}
