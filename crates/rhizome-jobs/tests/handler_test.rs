//! Job handlers driven through a [`JobContext`].

use std::sync::{Arc, Mutex};

use serde_json::json;
use uuid::Uuid;

use rhizome_db::{MemoryStore, ParagraphChunker};
use rhizome_jobs::{
    AnnotationRepository, Collaborators, ImportHighlightsHandler, JobContext, JobHandler, JobKind,
    JobRequest, JobResult, Repositories, ReprocessConfig, ReprocessHandler,
};

const TEXT: &str = "The archive opened in spring and drew scholars from three continents.\n\n\
Its reading room holds the only surviving copy of the harbour ledgers.";

async fn store_with_document() -> (Arc<MemoryStore>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let doc = Uuid::now_v7();
    store.create_document(doc).await;
    store
        .seed_chunks(doc, ParagraphChunker::default().split(TEXT))
        .await;
    (store, doc)
}

fn request(kind: JobKind, document_id: Uuid, payload: Option<serde_json::Value>) -> JobRequest {
    JobRequest {
        id: Uuid::now_v7(),
        kind,
        document_id,
        payload,
    }
}

#[tokio::test]
async fn test_reprocess_handler_reports_progress() {
    let (store, doc) = store_with_document().await;
    let handler = ReprocessHandler::new(
        Repositories::from_store(store),
        Collaborators::new(Arc::new(ParagraphChunker::default())),
        ReprocessConfig::default(),
    );
    assert!(handler.can_handle(JobKind::Reprocess));
    assert!(!handler.can_handle(JobKind::ImportHighlights));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let ctx = JobContext::new(request(
        JobKind::Reprocess,
        doc,
        Some(json!({ "text": format!("{}\n\nA closing note.", TEXT) })),
    ))
    .with_progress_callback(move |percent, _| sink.lock().unwrap().push(percent));

    match handler.execute(ctx).await {
        JobResult::Success(Some(value)) => assert_eq!(value["stage"], json!("committed")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(seen.lock().unwrap().last(), Some(&100));
}

#[tokio::test]
async fn test_reprocess_handler_rejects_missing_payload() {
    let (store, doc) = store_with_document().await;
    let handler = ReprocessHandler::new(
        Repositories::from_store(store),
        Collaborators::new(Arc::new(ParagraphChunker::default())),
        ReprocessConfig::default(),
    );

    let result = handler
        .execute(JobContext::new(request(JobKind::Reprocess, doc, None)))
        .await;
    assert!(matches!(result, JobResult::Failed(_)));
}

#[tokio::test]
async fn test_import_handler_stores_placed_highlights() {
    let (store, doc) = store_with_document().await;
    let handler = ImportHighlightsHandler::new(
        Repositories::from_store(store.clone()),
        &ReprocessConfig::default(),
    );

    let payload = json!({
        "text": TEXT,
        "highlights": [
            { "text": "the only surviving copy", "hint": { "kind": "fraction", "value": 0.8 } },
            { "text": "zxqv kwyjibo plmbrt" }
        ]
    });
    let result = handler
        .execute(JobContext::new(request(
            JobKind::ImportHighlights,
            doc,
            Some(payload),
        )))
        .await;

    let JobResult::Success(Some(summary)) = result else {
        panic!("import failed: {:?}", result);
    };
    assert_eq!(summary["imported"], json!(1));
    assert_eq!(summary["failed"], json!(1));

    let stored = store.list_for_document(doc).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].anchor.original_text, "the only surviving copy");
}
